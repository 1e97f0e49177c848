//! Background discovery of optional cluster capabilities.
//!
//! Some clusters offer an optional external-access API (the `Route` kind)
//! that is not part of the core APIs. The detector polls API discovery at a
//! fixed interval, and the first successful positive observation persists
//! the fact in the shared store and emits exactly one `CapabilityEvent`.
//! It is a level-triggered one-shot signal, not a stream of state: further
//! observations emit nothing, and listeners must themselves be idempotent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vigil_common::{ConfigStore, Error, Result};

/// API group of the optional external-access kind
pub const ROUTE_GROUP: &str = "route.openshift.io";
/// Version of the optional external-access kind
pub const ROUTE_VERSION: &str = "v1";
/// The optional external-access kind
pub const ROUTE_KIND: &str = "Route";

/// A discovered optional-kind descriptor, delivered at most once per kind
/// for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapabilityEvent {
    /// API group of the discovered kind
    pub group: String,
    /// API version of the discovered kind
    pub version: String,
    /// The discovered kind
    pub kind: String,
}

/// Best-effort discovery collaborator.
///
/// Errors mean "unknown", never "absent": the detector swallows them and
/// retries on the next tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryProbe: Send + Sync {
    /// Whether the given kind is registered on the cluster
    async fn has_kind(&self, group: &str, kind: &str) -> Result<bool>;
}

/// Discovery probe backed by the Kubernetes API server.
pub struct KubeDiscoveryProbe {
    client: Client,
}

impl KubeDiscoveryProbe {
    /// Build a probe over the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryProbe for KubeDiscoveryProbe {
    async fn has_kind(&self, group: &str, kind: &str) -> Result<bool> {
        let discovery = kube::discovery::Discovery::new(self.client.clone())
            .filter(&[group])
            .run()
            .await
            .map_err(|e| {
                Error::internal_with_context("discovery", format!("API discovery failed: {e}"))
            })?;

        for api_group in discovery.groups() {
            if api_group.name() != group {
                continue;
            }
            for (ar, _caps) in api_group.resources_by_stability() {
                if ar.kind == kind {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Poller that watches for the optional Route kind.
pub struct CapabilityDetector {
    probe: Arc<dyn DiscoveryProbe>,
    store: Arc<ConfigStore>,
    events: broadcast::Sender<CapabilityEvent>,
}

impl CapabilityDetector {
    /// Create a detector; it does nothing until `start` is called.
    pub fn new(probe: Arc<dyn DiscoveryProbe>, store: Arc<ConfigStore>) -> Self {
        let (events, _) = broadcast::channel(4);
        Self {
            probe,
            store,
            events,
        }
    }

    /// Subscribe to capability events.
    ///
    /// Must be called before `start` to guarantee delivery; a subscriber
    /// arriving after the one-shot event has fired sees nothing (the
    /// persisted flag in the store covers that case).
    pub fn subscribe(&self) -> broadcast::Receiver<CapabilityEvent> {
        self.events.subscribe()
    }

    /// Start the polling task: one probe immediately, then one per
    /// interval, until the capability is found or the token is cancelled.
    pub fn start(self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("capability detector stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if self.poll_once().await {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One probe attempt. Returns true when the capability was found and
    /// the one-shot event has fired (the task is done).
    async fn poll_once(&self) -> bool {
        match self.probe.has_kind(ROUTE_GROUP, ROUTE_KIND).await {
            Ok(true) => {
                info!(
                    group = ROUTE_GROUP,
                    kind = ROUTE_KIND,
                    "optional API discovered"
                );
                self.store.set_route_api_available();
                // No receivers is fine: the persisted flag is the durable
                // record, the event only accelerates watch installation.
                let _ = self.events.send(CapabilityEvent {
                    group: ROUTE_GROUP.to_string(),
                    version: ROUTE_VERSION.to_string(),
                    kind: ROUTE_KIND.to_string(),
                });
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(error = %e, "discovery query failed, retrying next tick");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::store::OperatorSettings;

    fn store() -> Arc<ConfigStore> {
        Arc::new(ConfigStore::new(OperatorSettings::default()))
    }

    #[tokio::test]
    async fn first_positive_probe_persists_flag_and_emits_one_event() {
        let mut probe = MockDiscoveryProbe::new();
        probe.expect_has_kind().returning(|_, _| Ok(true));

        let store = store();
        let detector = CapabilityDetector::new(Arc::new(probe), store.clone());
        let mut events = detector.subscribe();

        assert!(detector.poll_once().await);
        assert!(store.route_api_available());

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ROUTE_KIND);
        assert_eq!(event.group, ROUTE_GROUP);
        // Exactly one event: the channel is empty afterwards.
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn absent_capability_is_not_an_error_and_emits_nothing() {
        let mut probe = MockDiscoveryProbe::new();
        probe.expect_has_kind().returning(|_, _| Ok(false));

        let store = store();
        let detector = CapabilityDetector::new(Arc::new(probe), store.clone());
        let mut events = detector.subscribe();

        assert!(!detector.poll_once().await);
        assert!(!store.route_api_available());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn probe_errors_are_swallowed_and_retried() {
        let mut probe = MockDiscoveryProbe::new();
        let mut attempts = 0;
        probe.expect_has_kind().returning_st(move |_, _| {
            attempts += 1;
            if attempts < 3 {
                Err(Error::internal_with_context("discovery", "connection refused"))
            } else {
                Ok(true)
            }
        });

        let store = store();
        let detector = CapabilityDetector::new(Arc::new(probe), store.clone());

        assert!(!detector.poll_once().await);
        assert!(!detector.poll_once().await);
        assert!(detector.poll_once().await);
        assert!(store.route_api_available());
    }

    #[tokio::test]
    async fn polling_task_stops_on_cancellation() {
        let mut probe = MockDiscoveryProbe::new();
        probe.expect_has_kind().returning(|_, _| Ok(false));

        let detector = CapabilityDetector::new(Arc::new(probe), store());
        let token = CancellationToken::new();
        let handle = detector.start(Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        handle.await.unwrap();
    }
}
