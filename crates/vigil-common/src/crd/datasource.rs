//! The `VigilDatasource` Custom Resource Definition
//!
//! Datasources are provisioned, not submitted over the admin API: each spec
//! is rendered into the per-namespace datasource ConfigMap, which the
//! instance mounts at startup.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ChildStatus;

/// Spec for the `VigilDatasource` CRD
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "VigilDatasource",
    namespaced,
    status = "ChildStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VigilDatasourceSpec {
    /// Datasource definitions as the instance's provisioning format expects
    /// them (arbitrary structured documents)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<serde_json::Value>,
}
