//! The primary `Vigil` instance controller.
//!
//! Each cycle: serialize config, resolve the consolidated plugin set,
//! snapshot the cluster, plan, run. A fully successful cycle (all writes
//! applied, readiness checks passed) publishes fresh operational facts on
//! the state bus and moves the status to Ready. A cycle halted by a
//! readiness check publishes facts with `ready == false` so dependent
//! controllers pause, and requeues after a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use vigil_common::crd::{Condition, ConditionStatus, Vigil, VigilPhase, VigilStatus};
use vigil_common::events::{actions, reasons};
use vigil_common::{
    ConfigStore, Error, EventPublisher, Result, FAILURE_REQUEUE_SECS, RESYNC_SECS,
};

use super::{object_reference, FIELD_MANAGER};
use crate::inifile;
use crate::plugins::{PluginResolver, RegistryProbe, Resolution};
use crate::reconcile::{plan, ActionRunner, ClusterAction, ClusterSnapshot, KubeResourceStore, PlannerInput};
use crate::statebus::{OperationalFacts, StateBus};

/// Shared context for the instance controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Shared operator state
    pub store: Arc<ConfigStore>,
    /// Facts mailbox consumed by child controllers
    pub bus: Arc<StateBus>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Remote plugin registry probe
    pub registry: Arc<dyn RegistryProbe>,
    /// Cancelled on shutdown; aborts the runner between actions
    pub token: CancellationToken,
}

struct CycleOutcome {
    resolution: Resolution,
    wrote: bool,
}

/// Reconcile one `Vigil` object
#[instrument(skip(vigil, ctx), fields(instance = %vigil.name_any()))]
pub async fn reconcile(vigil: Arc<Vigil>, ctx: Arc<Context>) -> Result<Action> {
    let name = vigil.name_any();
    let namespace = vigil
        .namespace()
        .ok_or_else(|| Error::validation(&name, "instance must be namespaced"))?;

    if vigil.metadata.deletion_timestamp.is_some() {
        // Generated resources carry owner references; garbage collection
        // removes them without operator involvement.
        info!("instance deleting, children are garbage-collected");
        return Ok(Action::await_change());
    }

    info!("reconciling instance");
    let obj_ref = object_reference(vigil.as_ref());

    match run_cycle(&vigil, &ctx, &namespace, &name).await {
        Ok(outcome) => {
            ctx.bus.publish(facts(&vigil, &namespace, &name, true));

            if outcome.resolution.changed {
                ctx.events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reasons::PLUGINS_CHANGED,
                        actions::RESOLVE,
                        Some(format!(
                            "plugin set now has {} entries, workload restart scheduled",
                            outcome.resolution.selected.len()
                        )),
                    )
                    .await;
            }
            if outcome.wrote {
                ctx.events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reasons::PLAN_APPLIED,
                        actions::RECONCILE,
                        None,
                    )
                    .await;
            }

            let was_ready = matches!(
                vigil.status.as_ref().map(|s| &s.phase),
                Some(VigilPhase::Ready)
            );
            if !was_ready {
                ctx.events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reasons::INSTANCE_READY,
                        actions::RECONCILE,
                        None,
                    )
                    .await;
            }

            patch_status(
                &ctx.client,
                &namespace,
                &name,
                status_for(
                    &vigil,
                    VigilPhase::Ready,
                    None,
                    Some(admin_url(&vigil, &namespace, &name)),
                    Some(&outcome.resolution),
                ),
            )
            .await?;
            Ok(Action::requeue(Duration::from_secs(RESYNC_SECS)))
        }
        Err(e) if e.is_not_ready() => {
            info!(reason = %e, "cycle halted, waiting for readiness");
            ctx.bus.publish(facts(&vigil, &namespace, &name, false));
            patch_status(
                &ctx.client,
                &namespace,
                &name,
                status_for(
                    &vigil,
                    VigilPhase::Reconciling,
                    Some(e.to_string()),
                    None,
                    None,
                ),
            )
            .await?;
            Ok(Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS)))
        }
        Err(e) => {
            warn!(error = %e, "reconciliation failed");
            ctx.events
                .publish(
                    &obj_ref,
                    EventType::Warning,
                    reasons::RECONCILE_FAILED,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            patch_status(
                &ctx.client,
                &namespace,
                &name,
                status_for(&vigil, VigilPhase::Failed, Some(e.to_string()), None, None),
            )
            .await?;
            Err(e)
        }
    }
}

/// Requeue policy when `reconcile` returned an error
pub fn error_policy(vigil: Arc<Vigil>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        instance = %vigil.name_any(),
        error = %error,
        retryable = error.is_retryable(),
        "reconcile error"
    );
    Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS))
}

async fn run_cycle(
    vigil: &Vigil,
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<CycleOutcome> {
    let sections = vigil.spec.config.clone().unwrap_or_default();
    let config = match inifile::serialize(&sections) {
        Ok(doc) => Some(doc),
        Err(e) => {
            // Planner simply omits the config action; the rest of the
            // cycle proceeds against the last applied config.
            warn!(error = %e, "config serialization failed, skipping config update");
            None
        }
    };

    let resolver = PluginResolver::new(ctx.registry.clone(), ctx.store.clone());
    let resolution = resolver
        .resolve(&format!("{namespace}/{name}"), namespace)
        .await;
    for failed in &resolution.failed {
        warn!(plugin = %failed, "plugin failed the registry probe");
    }

    let use_route = ctx.store.route_api_available();
    let snapshot = ClusterSnapshot::read(&ctx.client, namespace, name, use_route).await?;
    let datasources = ctx.store.datasources(namespace);

    let actions = plan(&PlannerInput {
        vigil,
        namespace,
        instance: name,
        snapshot: &snapshot,
        config: config.as_ref(),
        datasources: &datasources,
        plugins: &resolution.selected,
        use_route,
    });
    let wrote = actions.iter().any(|a| {
        matches!(
            a,
            ClusterAction::Create { .. } | ClusterAction::Update { .. } | ClusterAction::Delete { .. }
        )
    });
    info!(actions = actions.len(), wrote, "plan ready");

    let owner = vigil
        .controller_owner_ref(&())
        .ok_or_else(|| Error::internal_with_context("controller", "instance has no uid yet"))?;
    let store = KubeResourceStore::new(ctx.client.clone(), namespace, owner);
    let runner = ActionRunner::new(Arc::new(store), ctx.token.clone());
    runner.run_all(&actions).await?;

    Ok(CycleOutcome { resolution, wrote })
}

/// URL child controllers use to reach the admin API.
///
/// The in-cluster service path is the default; the external host is used
/// only when access is enabled, a hostname is set, and the spec does not
/// pin submission to the service path.
fn admin_url(vigil: &Vigil, namespace: &str, name: &str) -> String {
    if vigil.external_access_enabled() && !vigil.prefers_service() {
        if let Some(host) = vigil
            .spec
            .external_access
            .as_ref()
            .and_then(|a| a.hostname.as_deref())
        {
            return format!("http://{host}");
        }
    }
    Vigil::service_url(namespace, name)
}

fn facts(vigil: &Vigil, namespace: &str, name: &str, ready: bool) -> OperationalFacts {
    let selector = vigil.spec.dashboards.clone().unwrap_or_default();
    let (admin_user, admin_password) = vigil.admin_credentials();
    let client_timeout = vigil
        .spec
        .client
        .as_ref()
        .and_then(|c| c.timeout_seconds)
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(5));

    OperationalFacts {
        admin_url: admin_url(vigil, namespace, name),
        ready,
        dashboard_label_selector: selector.match_labels,
        dashboard_namespace_labels: selector.namespace_labels,
        client_timeout,
        admin_user,
        admin_password,
    }
}

fn status_for(
    vigil: &Vigil,
    phase: VigilPhase,
    message: Option<String>,
    admin_url: Option<String>,
    resolution: Option<&Resolution>,
) -> VigilStatus {
    let condition_status = match phase {
        VigilPhase::Ready => ConditionStatus::True,
        VigilPhase::Failed => ConditionStatus::False,
        _ => ConditionStatus::Unknown,
    };
    let reason = match phase {
        VigilPhase::Ready => "WorkloadReady",
        VigilPhase::Failed => "ReconcileFailed",
        _ => "Reconciling",
    };

    let previous = vigil.status.as_ref();
    let conditions = vec![ready_condition(
        previous.map(|s| s.conditions.as_slice()).unwrap_or(&[]),
        condition_status,
        reason,
        message.clone().unwrap_or_default(),
    )];

    VigilStatus {
        phase,
        message,
        admin_url,
        installed_plugins: resolution
            .map(|r| r.selected.clone())
            .or_else(|| previous.map(|s| s.installed_plugins.clone()))
            .unwrap_or_default(),
        failed_plugins: resolution
            .map(|r| r.failed.clone())
            .or_else(|| previous.map(|s| s.failed_plugins.clone()))
            .unwrap_or_default(),
        conditions,
    }
}

// The transition time only moves when the observed status actually flips.
fn ready_condition(
    existing: &[Condition],
    status: ConditionStatus,
    reason: &str,
    message: String,
) -> Condition {
    if let Some(current) = existing.iter().find(|c| c.type_ == "Ready") {
        if current.status == status && current.reason == reason {
            let mut kept = current.clone();
            kept.message = message;
            return kept;
        }
    }
    Condition::new("Ready", status, reason, message)
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: VigilStatus,
) -> Result<()> {
    let api: Api<Vigil> = Api::namespaced(client.clone(), namespace);
    let mut status_value = serde_json::to_value(&status)
        .map_err(|e| Error::internal_with_context("controller", e.to_string()))?;
    // Explicit nulls so a merge patch clears fields that went away.
    if let Some(obj) = status_value.as_object_mut() {
        for field in ["message", "adminUrl"] {
            obj.entry(field).or_insert(serde_json::Value::Null);
        }
    }

    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({ "status": status_value })),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::{
        ClientSpec, DashboardSelector, ExternalAccessSpec, VigilSpec,
    };

    fn instance(spec: VigilSpec) -> Vigil {
        let mut vigil = Vigil::new("main", spec);
        vigil.metadata.namespace = Some("monitoring".to_string());
        vigil
    }

    #[test]
    fn admin_url_prefers_the_service_path_by_default() {
        let vigil = instance(VigilSpec::default());
        assert_eq!(
            admin_url(&vigil, "monitoring", "main"),
            "http://main.monitoring.svc:3000"
        );
    }

    #[test]
    fn admin_url_uses_the_external_host_when_enabled() {
        let vigil = instance(VigilSpec {
            external_access: Some(ExternalAccessSpec {
                hostname: Some("viz.example.com".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(admin_url(&vigil, "monitoring", "main"), "http://viz.example.com");
    }

    #[test]
    fn prefer_service_pins_submission_to_the_service_path() {
        let vigil = instance(VigilSpec {
            external_access: Some(ExternalAccessSpec {
                hostname: Some("viz.example.com".to_string()),
                ..Default::default()
            }),
            client: Some(ClientSpec {
                prefer_service: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            admin_url(&vigil, "monitoring", "main"),
            "http://main.monitoring.svc:3000"
        );
    }

    #[test]
    fn facts_carry_selectors_credentials_and_timeout() {
        let vigil = instance(VigilSpec {
            dashboards: Some(DashboardSelector {
                match_labels: [("team".to_string(), "sre".to_string())].into(),
                ..Default::default()
            }),
            client: Some(ClientSpec {
                timeout_seconds: Some(12),
                ..Default::default()
            }),
            ..Default::default()
        });

        let facts = facts(&vigil, "monitoring", "main", true);
        assert!(facts.ready);
        assert_eq!(facts.dashboard_label_selector["team"], "sre");
        assert_eq!(facts.client_timeout, Duration::from_secs(12));
        assert_eq!(facts.admin_user, "admin");
    }

    #[test]
    fn ready_condition_keeps_its_transition_time_while_stable() {
        let original = Condition::new("Ready", ConditionStatus::True, "WorkloadReady", "ok");
        let stamp = original.last_transition_time;

        let kept = ready_condition(
            std::slice::from_ref(&original),
            ConditionStatus::True,
            "WorkloadReady",
            "still ok".to_string(),
        );
        assert_eq!(kept.last_transition_time, stamp);
        assert_eq!(kept.message, "still ok");

        let flipped = ready_condition(
            &[original],
            ConditionStatus::False,
            "ReconcileFailed",
            "boom".to_string(),
        );
        assert!(flipped.last_transition_time >= stamp);
        assert_eq!(flipped.status, ConditionStatus::False);
    }

    #[test]
    fn failed_status_records_the_message_and_keeps_plugins() {
        let mut vigil = instance(VigilSpec::default());
        vigil.status = Some(VigilStatus {
            phase: VigilPhase::Ready,
            installed_plugins: vec![vigil_common::crd::PluginRequirement::new(
                "piechart", "1.0.1",
            )],
            ..Default::default()
        });

        let status = status_for(
            &vigil,
            VigilPhase::Failed,
            Some("kubernetes error: boom".to_string()),
            None,
            None,
        );
        assert_eq!(status.phase, VigilPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("kubernetes error: boom"));
        // Plugin lists survive a failed cycle that never re-resolved them.
        assert_eq!(status.installed_plugins.len(), 1);
    }
}
