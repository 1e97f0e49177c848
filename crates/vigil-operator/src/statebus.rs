//! Single-slot mailbox for the primary controller's operational facts.
//!
//! Built on `tokio::sync::watch`: capacity exactly one, every publish
//! overwrites the slot, latest value wins. There is no backpressure and no
//! delivery guarantee to a consumer that is not currently waiting; a late
//! subscriber observes only the most recent publish.
//!
//! A consumer that has not yet observed any publish blocks in `recv()`
//! rather than proceeding with a default value: dependent controllers must
//! not act before the primary controller's first successful reconciliation.
//! Dropping the bus closes the channel and unblocks parked consumers with
//! an error instead of leaving them waiting forever.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use vigil_common::Error;

/// Facts computed once per successful primary reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationalFacts {
    /// URL child controllers use to reach the admin API
    pub admin_url: String,
    /// Whether the workload passed its readiness check.
    ///
    /// `false` means "pause processing" for dependents, not an error.
    pub ready: bool,
    /// Labels a dashboard must carry to be picked up
    pub dashboard_label_selector: BTreeMap<String, String>,
    /// Labels a namespace must carry for its dashboards to be picked up;
    /// empty means same-namespace only
    pub dashboard_namespace_labels: BTreeMap<String, String>,
    /// Admin-API request timeout
    pub client_timeout: Duration,
    /// Admin user for basic auth
    pub admin_user: String,
    /// Admin password for basic auth
    pub admin_password: String,
}

/// Publishing side of the facts mailbox.
///
/// Owned by the primary controller; dropping it closes the bus.
pub struct StateBus {
    tx: watch::Sender<Option<OperationalFacts>>,
}

impl StateBus {
    /// Create an empty bus (no facts published yet)
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Overwrite the slot with fresh facts.
    ///
    /// Consumers currently waiting wake with exactly this value; consumers
    /// not waiting will observe it (or a newer one) on their next read.
    pub fn publish(&self, facts: OperationalFacts) {
        self.tx.send_replace(Some(facts));
    }

    /// Subscribe to the bus. The receiver sees only values published from
    /// now on, plus the latest already-published value if there is one.
    pub fn subscribe(&self) -> FactsReceiver {
        FactsReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consuming side of the facts mailbox
pub struct FactsReceiver {
    rx: watch::Receiver<Option<OperationalFacts>>,
}

impl FactsReceiver {
    /// Wait for facts, blocking until the first publish if none has
    /// happened yet. Returns the latest value at the time of wake-up.
    pub async fn recv(&mut self) -> Result<OperationalFacts, Error> {
        let slot = self
            .rx
            .wait_for(|value| value.is_some())
            .await
            .map_err(|_| {
                Error::internal_with_context("state-bus", "bus closed before facts were published")
            })?;
        slot.clone()
            .ok_or_else(|| Error::internal_with_context("state-bus", "slot empty after publish"))
    }

    /// The latest published facts without waiting, if any
    pub fn latest(&self) -> Option<OperationalFacts> {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(url: &str, ready: bool) -> OperationalFacts {
        OperationalFacts {
            admin_url: url.to_string(),
            ready,
            dashboard_label_selector: BTreeMap::new(),
            dashboard_namespace_labels: BTreeMap::new(),
            client_timeout: Duration::from_secs(5),
            admin_user: "admin".to_string(),
            admin_password: "admin".to_string(),
        }
    }

    #[tokio::test]
    async fn consumer_blocked_before_first_publish_wakes_with_that_value() {
        let bus = StateBus::new();
        let mut rx = bus.subscribe();
        assert!(rx.latest().is_none());

        let waiter = tokio::spawn(async move { rx.recv().await });
        // Give the waiter a chance to park on the empty slot.
        tokio::task::yield_now().await;

        bus.publish(facts("http://main.monitoring.svc:3000", true));
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.admin_url, "http://main.monitoring.svc:3000");
    }

    #[tokio::test]
    async fn late_subscriber_observes_only_the_latest_value() {
        let bus = StateBus::new();
        bus.publish(facts("http://first", true));
        bus.publish(facts("http://second", true));

        let mut rx = bus.subscribe();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.admin_url, "http://second");
        assert_eq!(rx.latest().unwrap().admin_url, "http://second");
    }

    #[tokio::test]
    async fn publish_overwrites_latest_wins() {
        let bus = StateBus::new();
        let mut rx = bus.subscribe();
        bus.publish(facts("http://a", false));
        bus.publish(facts("http://b", true));

        // A consumer that was not waiting never sees the first value.
        let got = rx.recv().await.unwrap();
        assert_eq!(got.admin_url, "http://b");
        assert!(got.ready);
    }

    #[tokio::test]
    async fn dropping_the_bus_unblocks_waiting_consumers() {
        let bus = StateBus::new();
        let mut rx = bus.subscribe();
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;

        drop(bus);
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
