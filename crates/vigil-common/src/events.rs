//! Kubernetes Event recording for Vigil controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that controllers can emit standard Kubernetes Events visible via
//! `kubectl describe` and `kubectl get events`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "PluginsChanged")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events
    /// (e.g. "vigil-instance-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
///
/// All calls are silently ignored, no Kubernetes API interaction.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        // intentionally empty
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    /// Instance reconciliation produced and ran a non-empty plan
    pub const PLAN_APPLIED: &str = "PlanApplied";
    /// Instance reported ready (workload readiness check passed)
    pub const INSTANCE_READY: &str = "InstanceReady";
    /// Instance reconciliation failed
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Consolidated plugin set changed, workload restart scheduled
    pub const PLUGINS_CHANGED: &str = "PluginsChanged";
    /// Child spec content failed validation
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// Dashboard submitted to the instance
    pub const DASHBOARD_APPLIED: &str = "DashboardApplied";
    /// Dashboard removed from the instance
    pub const DASHBOARD_REMOVED: &str = "DashboardRemoved";
    /// Notification channel submitted to the instance
    pub const CHANNEL_APPLIED: &str = "ChannelApplied";
    /// Notification channel removed from the instance
    pub const CHANNEL_REMOVED: &str = "ChannelRemoved";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Submitting a child entity to the instance's admin API
    pub const APPLY: &str = "Apply";
    /// Removing a child entity
    pub const DELETE: &str = "Delete";
    /// Resolving the consolidated plugin set
    pub const RESOLVE: &str = "Resolve";
}
