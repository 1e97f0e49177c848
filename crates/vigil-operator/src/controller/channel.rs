//! `VigilNotificationChannel` controller.
//!
//! Same shape as the dashboard controller minus plugins and selectors:
//! validate the document, wait for operational facts, submit under the
//! natural uid, deregister on deletion.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use vigil_common::crd::{ChildStatus, VigilNotificationChannel};
use vigil_common::events::{actions, reasons};
use vigil_common::store::ChildKey;
use vigil_common::{ConfigStore, Error, EventPublisher, Result, FAILURE_REQUEUE_SECS, RESYNC_SECS};

use super::{
    ensure_finalizer, object_reference, remove_finalizer, AdminGateway, FACTS_WAIT, FIELD_MANAGER,
};
use crate::statebus::StateBus;

/// Shared context for the channel controller
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

/// Reconcile one `VigilNotificationChannel`
#[instrument(skip(channel, ctx), fields(channel = %channel.name_any()))]
pub async fn reconcile(
    channel: Arc<VigilNotificationChannel>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let name = channel.name_any();
    let namespace = channel
        .namespace()
        .ok_or_else(|| Error::validation(&name, "channel must be namespaced"))?;
    let key = ChildKey::new(namespace.clone(), name.clone());
    let uid = channel.natural_uid(&namespace, &name);
    let api: Api<VigilNotificationChannel> = Api::namespaced(ctx.client.clone(), &namespace);

    if channel.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&channel, &ctx, &api, &key, &uid).await;
    }

    if ensure_finalizer(&api, channel.as_ref()).await? {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let document = match parse_document(&channel.spec.json) {
        Ok(doc) => doc,
        Err(reason) => {
            warn!(%reason, "channel content rejected");
            ctx.events
                .publish(
                    &object_reference(channel.as_ref()),
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    actions::APPLY,
                    Some(reason.clone()),
                )
                .await;
            patch_status(&api, &name, ChildStatus::failed(reason)).await?;
            return Ok(Action::await_change());
        }
    };

    let facts = {
        let mut rx = ctx.bus.subscribe();
        match tokio::time::timeout(FACTS_WAIT, rx.recv()).await {
            Ok(Ok(facts)) => facts,
            _ => {
                debug!("no operational facts yet, requeueing");
                return Ok(Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS)));
            }
        }
    };
    if !facts.ready {
        debug!("instance not ready, pausing channel submission");
        return Ok(Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS)));
    }

    ctx.gateway.apply_channel(&facts, &uid, document).await?;
    ctx.store.register_channel(key);
    info!(%uid, "notification channel applied");

    ctx.events
        .publish(
            &object_reference(channel.as_ref()),
            EventType::Normal,
            reasons::CHANNEL_APPLIED,
            actions::APPLY,
            Some(format!("submitted as {uid}")),
        )
        .await;
    patch_status(&api, &name, ChildStatus::applied(uid)).await?;
    Ok(Action::requeue(Duration::from_secs(RESYNC_SECS)))
}

/// Requeue policy when `reconcile` returned an error
pub fn error_policy(
    channel: Arc<VigilNotificationChannel>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    warn!(channel = %channel.name_any(), error = %error, "reconcile error");
    Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS))
}

async fn handle_deletion(
    channel: &VigilNotificationChannel,
    ctx: &Context,
    api: &Api<VigilNotificationChannel>,
    key: &ChildKey,
    uid: &str,
) -> Result<Action> {
    if !channel
        .finalizers()
        .iter()
        .any(|f| f == vigil_common::CHILD_FINALIZER)
    {
        return Ok(Action::await_change());
    }

    if let Some(facts) = ctx.bus.subscribe().latest() {
        if let Err(e) = ctx.gateway.delete_channel(&facts, uid).await {
            warn!(%uid, error = %e, "failed to remove channel from instance");
        }
    }
    ctx.store.remove_channel(key);
    remove_finalizer(api, channel).await?;

    ctx.events
        .publish(
            &object_reference(channel),
            EventType::Normal,
            reasons::CHANNEL_REMOVED,
            actions::DELETE,
            None,
        )
        .await;
    info!(%uid, "notification channel deregistered");
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

async fn patch_status(
    api: &Api<VigilNotificationChannel>,
    name: &str,
    status: ChildStatus,
) -> Result<()> {
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_document_must_be_a_json_object() {
        assert!(parse_document(r#"{"name": "pager", "type": "webhook"}"#).is_ok());
        assert!(parse_document("42").unwrap_err().contains("object"));
    }
}
