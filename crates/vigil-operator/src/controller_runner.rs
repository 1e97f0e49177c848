//! Builds the controller futures for each CRD.
//!
//! Each `build_*` function returns boxed futures the caller composes and
//! awaits; construction stays pure so the wiring is testable without a
//! cluster. The instance controller additionally carries the dynamic
//! Route watch: installed at most once, and only after the capability
//! detector has confirmed the API exists, since watching an unserved API
//! would fail permanently.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{watcher, Controller, WatchStreamExt};
use kube::{Api, Client};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use vigil_common::crd::{Vigil, VigilDashboard, VigilDatasource, VigilNotificationChannel};
use vigil_common::{ConfigStore, KubeEventPublisher};

use crate::capability::CapabilityEvent;
use crate::controller::{channel, dashboard, datasource, instance, HttpAdminGateway};
use crate::plugins::RegistryProbe;
use crate::resources::route::route_api_resource;
use crate::statebus::StateBus;

/// Watcher timeout (seconds), kept below the client read timeout so the
/// API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the instance controller plus its Route-watch installer
pub fn build_instance_controllers(
    client: Client,
    store: Arc<ConfigStore>,
    bus: Arc<StateBus>,
    registry: Arc<dyn RegistryProbe>,
    route_events: broadcast::Receiver<CapabilityEvent>,
    token: CancellationToken,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(instance::Context {
        client: client.clone(),
        store,
        bus,
        events: Arc::new(KubeEventPublisher::new(
            client.clone(),
            "vigil-instance-controller",
        )),
        registry,
        token: token.clone(),
    });

    // Route events re-trigger every instance: the preferred access kind
    // just changed, and existing objects will not see a spec event.
    let (trigger_tx, trigger_rx) = mpsc::channel::<()>(8);
    let installer = route_watch_installer(client.clone(), route_events, trigger_tx, token);

    let instances: Api<Vigil> = Api::all(client.clone());
    let cfg = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    tracing::info!("- Vigil instance controller");
    let controller = Controller::new(instances, cfg())
        .owns(Api::<Deployment>::all(client.clone()), cfg())
        .owns(Api::<ConfigMap>::all(client.clone()), cfg())
        .owns(Api::<ServiceAccount>::all(client.clone()), cfg())
        .owns(Api::<Ingress>::all(client.clone()), cfg())
        .reconcile_all_on(ReceiverStream::new(trigger_rx))
        .shutdown_on_signal()
        .run(instance::reconcile, instance::error_policy, ctx)
        .for_each(log_reconcile_result("Instance"));

    vec![Box::pin(controller), Box::pin(installer)]
}

/// Build the dashboard, datasource, and channel controller futures
pub fn build_child_controllers(
    client: Client,
    store: Arc<ConfigStore>,
    bus: Arc<StateBus>,
) -> Vec<ControllerFuture> {
    let cfg = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    tracing::info!("- VigilDashboard controller");
    let dashboard_ctx = Arc::new(dashboard::Context {
        client: client.clone(),
        store: store.clone(),
        bus: bus.clone(),
        gateway: Arc::new(HttpAdminGateway),
        events: Arc::new(KubeEventPublisher::new(
            client.clone(),
            "vigil-dashboard-controller",
        )),
    });
    let dashboards = Controller::new(Api::<VigilDashboard>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(dashboard::reconcile, dashboard::error_policy, dashboard_ctx)
        .for_each(log_reconcile_result("Dashboard"));

    tracing::info!("- VigilDatasource controller");
    let datasource_ctx = Arc::new(datasource::Context {
        client: client.clone(),
        store: store.clone(),
        events: Arc::new(KubeEventPublisher::new(
            client.clone(),
            "vigil-datasource-controller",
        )),
    });
    let datasources = Controller::new(Api::<VigilDatasource>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(
            datasource::reconcile,
            datasource::error_policy,
            datasource_ctx,
        )
        .for_each(log_reconcile_result("Datasource"));

    tracing::info!("- VigilNotificationChannel controller");
    let channel_ctx = Arc::new(channel::Context {
        client: client.clone(),
        store,
        bus,
        gateway: Arc::new(HttpAdminGateway),
        events: Arc::new(KubeEventPublisher::new(
            client.clone(),
            "vigil-channel-controller",
        )),
    });
    let channels = Controller::new(Api::<VigilNotificationChannel>::all(client), cfg())
        .shutdown_on_signal()
        .run(channel::reconcile, channel::error_policy, channel_ctx)
        .for_each(log_reconcile_result("Channel"));

    vec![
        Box::pin(dashboards),
        Box::pin(datasources),
        Box::pin(channels),
    ]
}

/// Waits for the capability event, then installs the dynamic Route watch
/// exactly once and forwards every touched Route as a reconcile trigger.
async fn route_watch_installer(
    client: Client,
    mut route_events: broadcast::Receiver<CapabilityEvent>,
    trigger_tx: mpsc::Sender<()>,
    token: CancellationToken,
) {
    let installed = AtomicBool::new(false);

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            event = route_events.recv() => event,
        };
        match event {
            Ok(event) => {
                if installed.swap(true, Ordering::SeqCst) {
                    continue;
                }
                tracing::info!(kind = %event.kind, group = %event.group, "installing dynamic watch");

                // Immediate trigger: instances reconciled before discovery
                // are still materialized as Ingress.
                let _ = trigger_tx.send(()).await;

                let api: Api<DynamicObject> = Api::all_with(client.clone(), &route_api_resource());
                let tx = trigger_tx.clone();
                let watch_token = token.clone();
                tokio::spawn(async move {
                    let watch = watcher(
                        api,
                        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                    )
                    .default_backoff()
                    .touched_objects()
                    .for_each(|result| {
                        let tx = tx.clone();
                        async move {
                            match result {
                                Ok(_) => {
                                    let _ = tx.send(()).await;
                                }
                                Err(e) => tracing::debug!(error = %e, "route watch error"),
                            }
                        }
                    });
                    tokio::select! {
                        _ = watch_token.cancelled() => {}
                        _ = watch => {}
                    }
                });
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(outcome) => {
                tracing::debug!(?outcome, "{} reconciliation completed", controller_name)
            }
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
