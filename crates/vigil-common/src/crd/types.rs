//! Shared types used across the Vigil CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A requested plugin: name plus exact version.
///
/// Dashboards declare these; the operator consolidates them across all
/// dashboards of a namespace and selects one version per name.
#[derive(
    Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct PluginRequirement {
    /// Plugin name as known to the registry
    pub name: String,
    /// Requested version (major.minor.patch)
    pub version: String,
}

impl PluginRequirement {
    /// Build a requirement from name and version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PluginRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Lifecycle phase of a `Vigil` instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum VigilPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// Resources are being created or updated
    Reconciling,
    /// Workload readiness check passed
    Ready,
    /// Last reconciliation failed; see status message
    Failed,
}

/// Lifecycle phase of a child spec (dashboard, datasource, channel)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ChildPhase {
    /// Not yet processed
    #[default]
    Pending,
    /// Content accepted and applied
    Applied,
    /// Content rejected; see status message
    Failed,
}

/// Status of a child spec.
///
/// Shared by all three child CRDs: a phase plus an optional message with
/// the validation or submission error.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ChildStatus {
    /// Current phase
    pub phase: ChildPhase,
    /// Human-readable detail, set when phase is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Natural key the entity was submitted under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ChildStatus {
    /// Status for successfully applied content
    pub fn applied(uid: impl Into<String>) -> Self {
        Self {
            phase: ChildPhase::Applied,
            message: None,
            uid: Some(uid.into()),
        }
    }

    /// Status for rejected content
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: ChildPhase::Failed,
            message: Some(message.into()),
            uid: None,
        }
    }
}

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Condition state cannot be determined
    #[default]
    Unknown,
}

/// A standard Kubernetes-style status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
