//! The `Vigil` Custom Resource Definition
//!
//! A `Vigil` object describes one managed visualization instance: its
//! configuration document, workload settings, and optional external access.
//! The instance controller owns every generated resource (ServiceAccount,
//! ConfigMaps, access resource, Deployment) via owner references.

use std::collections::{BTreeMap, HashMap};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, PluginRequirement, VigilPhase};
use crate::INSTANCE_HTTP_PORT;

/// Instance configuration: section name to key/value pairs.
///
/// Sections are independently optional; a present-but-empty section still
/// emits its header in the serialized document.
pub type ConfigSections = HashMap<String, HashMap<String, String>>;

/// Spec for the `Vigil` CRD
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "Vigil",
    namespaced,
    status = "VigilStatus",
    shortname = "vg",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VigilSpec {
    /// Instance configuration document, serialized into the config ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigSections>,

    /// Workload (Deployment) settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadSpec>,

    /// External access through an Ingress (or Route where available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access: Option<ExternalAccessSpec>,

    /// Which dashboards this instance picks up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboards: Option<DashboardSelector>,

    /// Admin-API client behavior for child-entity submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientSpec>,
}

/// Workload settings for the managed Deployment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Replica count (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Secrets exposed to the workload as env sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from_secrets: Vec<String>,

    /// ConfigMaps exposed to the workload as env sources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from_config_maps: Vec<String>,
}

/// External access settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccessSpec {
    /// Whether external access is requested (defaults to true when the
    /// section is present)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Hostname for the Ingress/Route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Path prefix (defaults to "/")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Selectors limiting which dashboards the instance picks up
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSelector {
    /// Dashboard objects must carry these labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Namespaces are matched by these labels; empty means same-namespace only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_labels: BTreeMap<String, String>,
}

/// Admin-API client settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    /// Request timeout in seconds for child-entity submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Prefer the in-cluster service path over the external host, even when
    /// external access is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_service: Option<bool>,
}

/// Status of a `Vigil` instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VigilStatus {
    /// Current phase
    pub phase: VigilPhase,

    /// Human-readable detail, set when phase is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// URL child controllers use to reach the admin API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,

    /// Plugins that passed the registry probe and are installed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed_plugins: Vec<PluginRequirement>,

    /// Plugins whose registry probe failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_plugins: Vec<PluginRequirement>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Vigil {
    /// Whether external access is requested by this spec
    pub fn external_access_enabled(&self) -> bool {
        self.spec
            .external_access
            .as_ref()
            .map(|a| a.enabled.unwrap_or(true))
            .unwrap_or(false)
    }

    /// Whether child controllers should prefer the in-cluster service path
    pub fn prefers_service(&self) -> bool {
        self.spec
            .client
            .as_ref()
            .and_then(|c| c.prefer_service)
            .unwrap_or(false)
    }

    /// Admin credentials from the security config section, with the
    /// conventional defaults when unset.
    pub fn admin_credentials(&self) -> (String, String) {
        let lookup = |key: &str| {
            self.spec
                .config
                .as_ref()
                .and_then(|c| c.get("security"))
                .and_then(|s| s.get(key))
                .cloned()
        };
        (
            lookup("admin_user").unwrap_or_else(|| "admin".to_string()),
            lookup("admin_password").unwrap_or_else(|| "admin".to_string()),
        )
    }

    /// In-cluster DNS URL of the instance
    pub fn service_url(namespace: &str, name: &str) -> String {
        format!(
            "http://{name}.{namespace}.svc:{port}",
            port = INSTANCE_HTTP_PORT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(spec: VigilSpec) -> Vigil {
        Vigil::new("main", spec)
    }

    #[test]
    fn external_access_defaults_off_when_section_absent() {
        let vigil = instance_with(VigilSpec::default());
        assert!(!vigil.external_access_enabled());
    }

    #[test]
    fn external_access_defaults_on_when_section_present() {
        let vigil = instance_with(VigilSpec {
            external_access: Some(ExternalAccessSpec::default()),
            ..Default::default()
        });
        assert!(vigil.external_access_enabled());

        let vigil = instance_with(VigilSpec {
            external_access: Some(ExternalAccessSpec {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(!vigil.external_access_enabled());
    }

    #[test]
    fn admin_credentials_fall_back_to_defaults() {
        let vigil = instance_with(VigilSpec::default());
        assert_eq!(
            vigil.admin_credentials(),
            ("admin".to_string(), "admin".to_string())
        );

        let mut security = HashMap::new();
        security.insert("admin_user".to_string(), "root".to_string());
        security.insert("admin_password".to_string(), "hunter2".to_string());
        let mut config = HashMap::new();
        config.insert("security".to_string(), security);

        let vigil = instance_with(VigilSpec {
            config: Some(config),
            ..Default::default()
        });
        assert_eq!(
            vigil.admin_credentials(),
            ("root".to_string(), "hunter2".to_string())
        );
    }

    #[test]
    fn spec_round_trips_camel_case() {
        let json = serde_json::json!({
            "externalAccess": { "hostname": "viz.example.com" },
            "workload": { "replicas": 2, "envFromSecrets": ["creds"] },
            "client": { "timeoutSeconds": 10, "preferService": true }
        });
        let spec: VigilSpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec.external_access.as_ref().unwrap().hostname.as_deref(),
            Some("viz.example.com")
        );
        assert_eq!(spec.workload.as_ref().unwrap().replicas, Some(2));
        assert_eq!(spec.client.as_ref().unwrap().timeout_seconds, Some(10));
    }
}
