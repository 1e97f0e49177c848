//! `VigilDatasource` controller.
//!
//! Datasources never touch the admin API: each spec is rendered into a
//! provisioning file and registered in the shared store, and the instance
//! controller folds every registered file of the namespace into the
//! datasource ConfigMap on its next cycle.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{info, instrument, warn};

use vigil_common::crd::{ChildStatus, VigilDatasource};
use vigil_common::events::{actions, reasons};
use vigil_common::store::ChildKey;
use vigil_common::{ConfigStore, Error, EventPublisher, Result, FAILURE_REQUEUE_SECS, RESYNC_SECS};

use super::{ensure_finalizer, object_reference, remove_finalizer, FIELD_MANAGER};

/// Shared context for the datasource controller
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Shared operator state
    pub store: Arc<ConfigStore>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
}

/// Reconcile one `VigilDatasource`
#[instrument(skip(datasource, ctx), fields(datasource = %datasource.name_any()))]
pub async fn reconcile(datasource: Arc<VigilDatasource>, ctx: Arc<Context>) -> Result<Action> {
    let name = datasource.name_any();
    let namespace = datasource
        .namespace()
        .ok_or_else(|| Error::validation(&name, "datasource must be namespaced"))?;
    let key = ChildKey::new(namespace.clone(), name.clone());
    let api: Api<VigilDatasource> = Api::namespaced(ctx.client.clone(), &namespace);

    if datasource.metadata.deletion_timestamp.is_some() {
        if datasource
            .finalizers()
            .iter()
            .any(|f| f == vigil_common::CHILD_FINALIZER)
        {
            ctx.store.remove_datasource(&key);
            remove_finalizer(&api, datasource.as_ref()).await?;
            info!("datasource deregistered");
        }
        return Ok(Action::await_change());
    }

    if ensure_finalizer(&api, datasource.as_ref()).await? {
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let payload = match render_provisioning(&datasource) {
        Ok(payload) => payload,
        Err(reason) => {
            warn!(%reason, "datasource content rejected");
            ctx.events
                .publish(
                    &object_reference(datasource.as_ref()),
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

    ctx.store.set_datasource(key.clone(), payload);
    patch_status(&api, &name, ChildStatus::applied(key.to_string())).await?;
    Ok(Action::requeue(Duration::from_secs(RESYNC_SECS)))
}

/// Requeue policy when `reconcile` returned an error
pub fn error_policy(datasource: Arc<VigilDatasource>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(datasource = %datasource.name_any(), error = %error, "reconcile error");
    Action::requeue(Duration::from_secs(FAILURE_REQUEUE_SECS))
}

/// Render the provisioning file the instance expects at startup.
fn render_provisioning(datasource: &VigilDatasource) -> std::result::Result<String, String> {
    if datasource.spec.datasources.is_empty() {
        return Err("spec.datasources must not be empty".to_string());
    }
    for (index, entry) in datasource.spec.datasources.iter().enumerate() {
        if !entry.is_object() {
            return Err(format!("spec.datasources[{index}] must be a JSON object"));
        }
    }

    let document = json!({
        "apiVersion": 1,
        "datasources": datasource.spec.datasources,
    });
    serde_yaml::to_string(&document).map_err(|e| format!("failed to render provisioning: {e}"))
}

async fn patch_status(api: &Api<VigilDatasource>, name: &str, status: ChildStatus) -> Result<()> {
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
