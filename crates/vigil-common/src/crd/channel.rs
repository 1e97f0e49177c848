//! The `VigilNotificationChannel` Custom Resource Definition
//!
//! Channels are submitted to the running instance over the admin API, keyed
//! by a stable natural uid like dashboards.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ChildStatus;

/// Spec for the `VigilNotificationChannel` CRD
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vigil.dev",
    version = "v1alpha1",
    kind = "VigilNotificationChannel",
    namespaced,
    status = "ChildStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VigilNotificationChannelSpec {
    /// Channel definition as raw JSON
    pub json: String,

    /// Explicit natural key; defaults to `{namespace}-{name}` of this object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl VigilNotificationChannel {
    /// Natural key the channel is submitted under
    pub fn natural_uid(&self, namespace: &str, name: &str) -> String {
        self.spec
            .uid
            .clone()
            .unwrap_or_else(|| format!("{namespace}-{name}"))
    }
}
