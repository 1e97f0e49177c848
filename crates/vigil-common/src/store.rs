//! Shared operator state: settings, capability flags, and per-namespace
//! caches of metadata derived from child specs.
//!
//! The store is an explicitly constructed, `Arc`-shared object passed into
//! every controller; all mutation happens behind one internal mutex. The
//! lock is never held across an await point. One process-wide lock is a
//! fairness concern under heavy churn, not a correctness one.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::crd::PluginRequirement;

/// Namespaced identity of a child spec (dashboard, datasource, channel).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChildKey {
    /// Namespace of the child object
    pub namespace: String,
    /// Name of the child object
    pub name: String,
}

impl ChildKey {
    /// Build a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ChildKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Static operator settings, fixed at startup.
#[derive(Clone, Debug)]
pub struct OperatorSettings {
    /// URL template for the remote plugin existence probe.
    ///
    /// `{name}` and `{version}` placeholders are substituted per plugin.
    pub plugin_registry_url: String,
    /// Interval between optional-API discovery polls
    pub capability_poll_interval: Duration,
    /// Default admin-API client timeout for child-entity submission
    pub client_timeout: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            plugin_registry_url:
                "https://plugins.vigil.dev/api/plugins/{name}/versions/{version}".to_string(),
            capability_poll_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Inner {
    route_api_available: bool,
    /// Plugin requirements keyed by the dashboard that declared them
    plugin_requirements: BTreeMap<ChildKey, Vec<PluginRequirement>>,
    /// Rendered datasource provisioning payloads keyed by the datasource spec
    datasources: BTreeMap<ChildKey, String>,
    /// Notification channels known to have been submitted
    channels: BTreeSet<ChildKey>,
    /// Installed plugin set per owning instance ("namespace/name")
    installed_plugins: BTreeMap<String, BTreeSet<(String, String)>>,
}

/// Process-lifetime registry shared by all controllers.
pub struct ConfigStore {
    settings: OperatorSettings,
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Create a store with the given settings
    pub fn new(settings: OperatorSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Immutable operator settings
    pub fn settings(&self) -> &OperatorSettings {
        &self.settings
    }

    // --- capability flags ---------------------------------------------------

    /// Record that the optional Route API was discovered on the cluster
    pub fn set_route_api_available(&self) {
        self.lock().route_api_available = true;
    }

    /// Whether the optional Route API has been discovered
    pub fn route_api_available(&self) -> bool {
        self.lock().route_api_available
    }

    // --- plugin requirements ------------------------------------------------

    /// Replace the plugin requirements declared by one dashboard
    pub fn set_plugin_requirements(&self, key: ChildKey, requirements: Vec<PluginRequirement>) {
        self.lock().plugin_requirements.insert(key, requirements);
    }

    /// Drop everything registered by a dashboard (on deletion)
    pub fn remove_dashboard(&self, key: &ChildKey) {
        self.lock().plugin_requirements.remove(key);
    }

    /// The full multiset of plugin requirements aggregated across every
    /// dashboard currently tracked in the given namespace.
    pub fn aggregated_requirements(&self, namespace: &str) -> Vec<PluginRequirement> {
        let inner = self.lock();
        inner
            .plugin_requirements
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .flat_map(|(_, reqs)| reqs.iter().cloned())
            .collect()
    }

    // --- datasources --------------------------------------------------------

    /// Replace the rendered provisioning payload of one datasource spec
    pub fn set_datasource(&self, key: ChildKey, payload: String) {
        self.lock().datasources.insert(key, payload);
    }

    /// Drop a datasource payload (on deletion)
    pub fn remove_datasource(&self, key: &ChildKey) {
        self.lock().datasources.remove(key);
    }

    /// All datasource payloads for a namespace, keyed by provisioning file
    /// name. BTreeMap keeps ConfigMap data deterministic.
    pub fn datasources(&self, namespace: &str) -> BTreeMap<String, String> {
        let inner = self.lock();
        inner
            .datasources
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(key, payload)| (format!("{}_{}.yaml", key.namespace, key.name), payload.clone()))
            .collect()
    }

    // --- notification channels ----------------------------------------------

    /// Record that a channel has been submitted to the instance
    pub fn register_channel(&self, key: ChildKey) {
        self.lock().channels.insert(key);
    }

    /// Forget a channel (on deletion)
    pub fn remove_channel(&self, key: &ChildKey) {
        self.lock().channels.remove(key);
    }

    /// Whether a channel is currently known
    pub fn channel_known(&self, key: &ChildKey) -> bool {
        self.lock().channels.contains(key)
    }

    // --- installed plugin set -----------------------------------------------

    /// The (name, version) set recorded as installed for an instance
    pub fn installed_plugins(&self, instance: &str) -> BTreeSet<(String, String)> {
        self.lock()
            .installed_plugins
            .get(instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the freshly selected (name, version) set for an instance
    pub fn set_installed_plugins(&self, instance: &str, plugins: BTreeSet<(String, String)>) {
        self.lock()
            .installed_plugins
            .insert(instance.to_string(), plugins);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic while holding it; the caches are
        // rebuilt by level-triggered resync, so continuing is safe.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(OperatorSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, version: &str) -> PluginRequirement {
        PluginRequirement {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    #[test]
    fn aggregates_requirements_per_namespace() {
        let store = ConfigStore::default();
        store.set_plugin_requirements(
            ChildKey::new("monitoring", "latency"),
            vec![req("piechart", "1.0.0")],
        );
        store.set_plugin_requirements(
            ChildKey::new("monitoring", "errors"),
            vec![req("piechart", "1.0.1"), req("clock", "2.0.0")],
        );
        store.set_plugin_requirements(ChildKey::new("other", "foo"), vec![req("gauge", "0.1.0")]);

        let mut reqs = store.aggregated_requirements("monitoring");
        reqs.sort();
        assert_eq!(
            reqs,
            vec![
                req("clock", "2.0.0"),
                req("piechart", "1.0.0"),
                req("piechart", "1.0.1"),
            ]
        );
    }

    #[test]
    fn removing_a_dashboard_drops_its_requirements() {
        let store = ConfigStore::default();
        let key = ChildKey::new("monitoring", "latency");
        store.set_plugin_requirements(key.clone(), vec![req("piechart", "1.0.0")]);
        assert_eq!(store.aggregated_requirements("monitoring").len(), 1);

        store.remove_dashboard(&key);
        assert!(store.aggregated_requirements("monitoring").is_empty());
    }

    #[test]
    fn datasource_payloads_are_keyed_by_provisioning_file_name() {
        let store = ConfigStore::default();
        store.set_datasource(ChildKey::new("monitoring", "prometheus"), "a: 1".to_string());
        store.set_datasource(ChildKey::new("monitoring", "loki"), "b: 2".to_string());

        let data = store.datasources("monitoring");
        assert_eq!(data.len(), 2);
        assert_eq!(data["monitoring_prometheus.yaml"], "a: 1");
        assert_eq!(data["monitoring_loki.yaml"], "b: 2");
        assert!(store.datasources("elsewhere").is_empty());
    }

    #[test]
    fn route_capability_flag_persists() {
        let store = ConfigStore::default();
        assert!(!store.route_api_available());
        store.set_route_api_available();
        assert!(store.route_api_available());
    }

    #[test]
    fn installed_plugin_set_round_trips() {
        let store = ConfigStore::default();
        assert!(store.installed_plugins("monitoring/main").is_empty());

        let set: BTreeSet<_> = [("piechart".to_string(), "1.0.1".to_string())].into();
        store.set_installed_plugins("monitoring/main", set.clone());
        assert_eq!(store.installed_plugins("monitoring/main"), set);
    }

    #[test]
    fn channels_register_and_remove() {
        let store = ConfigStore::default();
        let key = ChildKey::new("monitoring", "pager");
        assert!(!store.channel_known(&key));
        store.register_channel(key.clone());
        assert!(store.channel_known(&key));
        store.remove_channel(&key);
        assert!(!store.channel_known(&key));
    }
}
