//! Ingress for external access to the instance

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};

use vigil_common::crd::Vigil;
use vigil_common::INSTANCE_HTTP_PORT;

use super::object_meta;

/// Desired Ingress routing the external host to the instance service
pub fn ingress(namespace: &str, instance: &str, vigil: &Vigil) -> Ingress {
    let access = vigil.spec.external_access.clone().unwrap_or_default();
    let path = access.path.unwrap_or_else(|| "/".to_string());

    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: instance.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(INSTANCE_HTTP_PORT),
                ..ServiceBackendPort::default()
            }),
        }),
        ..IngressBackend::default()
    };

    Ingress {
        metadata: object_meta(namespace, instance, instance),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: access.hostname,
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::{ExternalAccessSpec, VigilSpec};

    #[test]
    fn routes_the_host_to_the_instance_port() {
        let vigil = Vigil::new(
            "main",
            VigilSpec {
                external_access: Some(ExternalAccessSpec {
                    hostname: Some("viz.example.com".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let ing = ingress("monitoring", "main", &vigil);
        let rule = &ing.spec.as_ref().unwrap().rules.as_ref().unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("viz.example.com"));

        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        let service = path.backend.service.as_ref().unwrap();
        assert_eq!(service.name, "main");
        assert_eq!(service.port.as_ref().unwrap().number, Some(INSTANCE_HTTP_PORT));
    }
}
