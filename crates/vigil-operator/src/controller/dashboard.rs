//! `VigilDashboard` controller.
//!
//! Validates the dashboard document, registers the plugin requirements
//! with the shared store, and submits the document to the instance's
//! admin API under its natural uid. Submission waits for operational
//! facts from the primary controller and pauses while the instance is
//! not ready; a dashboard with invalid content is failed on its own
//! status without affecting any sibling.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use vigil_common::crd::{ChildStatus, VigilDashboard};
use vigil_common::events::{actions, reasons};
use vigil_common::store::ChildKey;
use vigil_common::{ConfigStore, Error, EventPublisher, Result, FAILURE_REQUEUE_SECS, RESYNC_SECS};

use super::{
    ensure_finalizer, object_reference, remove_finalizer, AdminGateway, FACTS_WAIT, FIELD_MANAGER,
};
use crate::statebus::{OperationalFacts, StateBus};

/// Shared context for the dashboard controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Shared operator state
    pub store: Arc<ConfigStore>,
    /// Facts mailbox fed by the instance controller
    pub bus: Arc<StateBus>,
    /// Admin API gateway
    pub gateway: Arc<dyn AdminGateway>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
}

/// Reconcile one `VigilDashboard`
#[instrument(skip(dashboard, ctx), fields(dashboard = %dashboard.name_any()))]
pub async fn reconcile(dashboard: Arc<VigilDashboard>, ctx: Arc<Context>) -> Result<Action> {
    let name = dashboard.name_any();
    let namespace = dashboard
        .namespace()
        .ok_or_else(|| Error::validation(&name, "dashboard must be namespaced"))?;
    let key = ChildKey::new(namespace.clone(), name.clone());
    let uid = dashboard.natural_uid(&namespace, &name);
    let api: Api<VigilDashboard> = Api::namespaced(ctx.client.clone(), &namespace);

    if dashboard.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&dashboard, &ctx, &api, &key, &uid).await;
    }

    if ensure_finalizer(&api, dashboard.as_ref()).await? {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // Validate before touching any shared state.
    let document = match parse_document(&dashboard.spec.json) {
        Ok(doc) => doc,
        Err(reason) => {
            warn!(%reason, "dashboard content rejected");
            ctx.events
                .publish(
                    &object_reference(dashboard.as_ref()),
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    actions::APPLY,
                    Some(reason.clone()),
                )
                .await;
            patch_status(&api, &name, ChildStatus::failed(reason)).await?;
            // A spec change is required; requeueing would only repeat this.
            return Ok(Action::await_change());
        }
    };

    ctx.store
        .set_plugin_requirements(key, dashboard.spec.plugins.clone());

    let facts = match wait_for_facts(&ctx.bus).await {
        Some(facts) => facts,
        None => {
            debug!("no operational facts yet, requeueing");
            return Ok(Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS)));
        }
    };
    if !facts.ready {
        debug!("instance not ready, pausing dashboard submission");
        return Ok(Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS)));
    }
    if !selector_matches(&facts, dashboard.labels()) {
        debug!("dashboard labels do not match the instance selector");
        return Ok(Action::await_change());
    }

    ctx.gateway
        .apply_dashboard(&facts, &uid, document, dashboard.spec.folder.clone())
        .await?;
    info!(%uid, "dashboard applied");

    ctx.events
        .publish(
            &object_reference(dashboard.as_ref()),
            EventType::Normal,
            reasons::DASHBOARD_APPLIED,
            actions::APPLY,
            Some(format!("submitted as {uid}")),
        )
        .await;
    patch_status(&api, &name, ChildStatus::applied(uid)).await?;
    Ok(Action::requeue(Duration::from_secs(RESYNC_SECS)))
}

/// Requeue policy when `reconcile` returned an error
pub fn error_policy(dashboard: Arc<VigilDashboard>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(dashboard = %dashboard.name_any(), error = %error, "reconcile error");
    Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS))
}

async fn handle_deletion(
    dashboard: &VigilDashboard,
    ctx: &Context,
    api: &Api<VigilDashboard>,
    key: &ChildKey,
    uid: &str,
) -> Result<Action> {
    if !dashboard
        .finalizers()
        .iter()
        .any(|f| f == vigil_common::CHILD_FINALIZER)
    {
        return Ok(Action::await_change());
    }

    // Remote removal is best-effort: without facts there is no instance
    // to remove from, and the deregistration must not block deletion.
    if let Some(facts) = ctx.bus.subscribe().latest() {
        if let Err(e) = ctx.gateway.delete_dashboard(&facts, uid).await {
            warn!(%uid, error = %e, "failed to remove dashboard from instance");
        }
    }
    ctx.store.remove_dashboard(key);
    remove_finalizer(api, dashboard).await?;

    ctx.events
        .publish(
            &object_reference(dashboard),
            EventType::Normal,
            reasons::DASHBOARD_REMOVED,
            actions::DELETE,
            None,
        )
        .await;
    info!(%uid, "dashboard deregistered");
    Ok(Action::await_change())
}

fn parse_document(json: &str) -> std::result::Result<Value, String> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("spec.json is not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("spec.json must be a JSON object".to_string());
    }
    Ok(value)
}

/// The instance selector must be a subset of the dashboard's labels.
fn selector_matches(
    facts: &OperationalFacts,
    labels: &std::collections::BTreeMap<String, String>,
) -> bool {
    facts
        .dashboard_label_selector
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v))
}

async fn wait_for_facts(bus: &StateBus) -> Option<OperationalFacts> {
    let mut rx = bus.subscribe();
    match tokio::time::timeout(FACTS_WAIT, rx.recv()).await {
        Ok(Ok(facts)) => Some(facts),
        Ok(Err(e)) => {
            debug!(error = %e, "facts bus closed");
            None
        }
        Err(_) => None,
    }
}

async fn patch_status(api: &Api<VigilDashboard>, name: &str, status: ChildStatus) -> Result<()> {
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
