//! Route for external access on clusters exposing the optional Route API.
//!
//! The Route kind is not compiled into k8s-openapi, so it is handled as a
//! `DynamicObject` against a fixed `ApiResource` descriptor.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::json;

use vigil_common::crd::Vigil;
use vigil_common::INSTANCE_HTTP_PORT;

use super::object_meta;
use crate::capability::{ROUTE_GROUP, ROUTE_KIND, ROUTE_VERSION};

/// Descriptor used for every dynamic Route API call
pub fn route_api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(ROUTE_GROUP, ROUTE_VERSION, ROUTE_KIND))
}

/// Desired Route pointing the external host at the instance service
pub fn route(namespace: &str, instance: &str, vigil: &Vigil) -> DynamicObject {
    let access = vigil.spec.external_access.clone().unwrap_or_default();

    let mut spec = json!({
        "to": {
            "kind": "Service",
            "name": instance,
            "weight": 100,
        },
        "port": {
            "targetPort": INSTANCE_HTTP_PORT,
        },
    });
    if let Some(host) = access.hostname {
        spec["host"] = json!(host);
    }
    if let Some(path) = access.path {
        spec["path"] = json!(path);
    }

    let mut object = DynamicObject::new(instance, &route_api_resource());
    object.metadata = object_meta(namespace, instance, instance);
    object.data = json!({ "spec": spec });
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::{ExternalAccessSpec, VigilSpec};

    #[test]
    fn api_resource_targets_the_optional_group() {
        let ar = route_api_resource();
        assert_eq!(ar.group, ROUTE_GROUP);
        assert_eq!(ar.version, ROUTE_VERSION);
        assert_eq!(ar.kind, ROUTE_KIND);
    }

    #[test]
    fn route_spec_targets_the_instance_service() {
        let vigil = Vigil::new(
            "main",
            VigilSpec {
                external_access: Some(ExternalAccessSpec {
                    hostname: Some("viz.example.com".to_string()),
                    path: Some("/viz".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let obj = route("monitoring", "main", &vigil);
        assert_eq!(obj.metadata.name.as_deref(), Some("main"));

        let spec = &obj.data["spec"];
        assert_eq!(spec["to"]["name"], "main");
        assert_eq!(spec["port"]["targetPort"], INSTANCE_HTTP_PORT);
        assert_eq!(spec["host"], "viz.example.com");
        assert_eq!(spec["path"], "/viz");
    }

    #[test]
    fn host_is_omitted_when_unset() {
        let vigil = Vigil::new("main", VigilSpec::default());
        let obj = route("monitoring", "main", &vigil);
        assert!(obj.data["spec"].get("host").is_none());
    }
}
