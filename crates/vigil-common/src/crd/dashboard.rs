//! The `VigilDashboard` Custom Resource Definition
//!
//! A dashboard carries its panel document as raw JSON plus the plugins it
//! needs. The dashboard controller validates the document, registers the
//! plugin requirements with the shared store, and submits the dashboard to
//! the instance's admin API under a stable natural key.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ChildStatus, PluginRequirement};

/// Spec for the `VigilDashboard` CRD
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "VigilDashboard",
    namespaced,
    status = "ChildStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VigilDashboardSpec {
    /// Dashboard document as raw JSON
    pub json: String,

    /// Explicit natural key; defaults to `{namespace}-{name}` of this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Folder to place the dashboard in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    /// Plugins this dashboard requires
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginRequirement>,
}

impl VigilDashboard {
    /// Natural key the dashboard is submitted under.
    ///
    /// Stable across recreation of the object, so submission is
    /// create-or-update rather than blind create.
    pub fn natural_uid(&self, namespace: &str, name: &str) -> String {
        self.spec
            .uid
            .clone()
            .unwrap_or_else(|| format!("{namespace}-{name}"))
    }
}
