//! Consolidation of plugin requirements across child specs.
//!
//! Dashboards declare (name, version) plugin requirements; the store
//! aggregates them per namespace. Resolution groups the multiset by name,
//! selects the highest version, verifies each selection against the remote
//! registry, and reports whether the resulting valid set differs from the
//! previously recorded installed set. That boolean is the only signal
//! callers use to decide on a workload restart: "selection computed but
//! identical to before" reports false and is not a failure.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use vigil_common::crd::PluginRequirement;
use vigil_common::ConfigStore;

/// Remote existence lookup against the plugin registry.
///
/// Success implies existence; any non-success response or transport error
/// is treated as "does not exist" for this cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryProbe: Send + Sync {
    /// Whether the registry knows this exact name and version
    async fn exists(&self, name: &str, version: &str) -> bool;
}

/// Registry probe over HTTP, using the templated URL from the operator
/// settings (`{name}` and `{version}` placeholders).
pub struct HttpRegistryProbe {
    http: reqwest::Client,
    url_template: String,
}

impl HttpRegistryProbe {
    /// Build a probe with the given URL template and request timeout
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            url_template: url_template.into(),
        })
    }
}

#[async_trait]
impl RegistryProbe for HttpRegistryProbe {
    async fn exists(&self, name: &str, version: &str) -> bool {
        let url = self
            .url_template
            .replace("{name}", name)
            .replace("{version}", version);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(name, version, error = %e, "registry probe transport error");
                false
            }
        }
    }
}

/// Outcome of one resolution pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    /// Selected plugins that exist in the registry, sorted by name
    pub selected: Vec<PluginRequirement>,
    /// Selected plugins whose existence probe failed, sorted by name
    pub failed: Vec<PluginRequirement>,
    /// Whether the valid set differs from the previously recorded
    /// installed set (by name+version set equality)
    pub changed: bool,
}

/// Resolves the consolidated plugin set for one instance.
pub struct PluginResolver {
    probe: Arc<dyn RegistryProbe>,
    store: Arc<ConfigStore>,
}

impl PluginResolver {
    /// Create a resolver over the given probe and store
    pub fn new(probe: Arc<dyn RegistryProbe>, store: Arc<ConfigStore>) -> Self {
        Self { probe, store }
    }

    /// Resolve the aggregated requirements of `namespace` for the instance
    /// identified by `instance_key` ("namespace/name").
    ///
    /// Updates the store's installed set to the fresh valid set; `changed`
    /// compares against the set recorded before this call. A probe failure
    /// degrades only that one plugin and never aborts the batch.
    pub async fn resolve(&self, instance_key: &str, namespace: &str) -> Resolution {
        let requirements = self.store.aggregated_requirements(namespace);
        let candidates = select_latest(&requirements);
        for req in &requirements {
            if has_newer_version(&candidates, req) {
                debug!(plugin = %req, "requirement superseded by a newer selection");
            }
        }

        let mut selected = Vec::new();
        let mut failed = Vec::new();
        for plugin in candidates {
            if self.probe.exists(&plugin.name, &plugin.version).await {
                selected.push(plugin);
            } else {
                warn!(plugin = %plugin, "plugin not found in registry, skipping");
                failed.push(plugin);
            }
        }

        let fresh: BTreeSet<(String, String)> = selected
            .iter()
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect();
        let previous = self.store.installed_plugins(instance_key);
        let changed = fresh != previous;
        if changed {
            self.store.set_installed_plugins(instance_key, fresh);
        }

        Resolution {
            selected,
            failed,
            changed,
        }
    }
}

/// Group requirements by name and keep the highest version of each,
/// ordered by name.
pub fn select_latest(requirements: &[PluginRequirement]) -> Vec<PluginRequirement> {
    let mut best: BTreeMap<&str, &PluginRequirement> = BTreeMap::new();
    for req in requirements {
        match best.get(req.name.as_str()) {
            Some(current) if compare_versions(&req.version, &current.version) != Ordering::Greater => {}
            _ => {
                best.insert(&req.name, req);
            }
        }
    }
    best.into_values().cloned().collect()
}

/// Whether any requirement names a strictly newer version of `than`.
pub fn has_newer_version(requirements: &[PluginRequirement], than: &PluginRequirement) -> bool {
    requirements.iter().any(|req| {
        req.name == than.name && compare_versions(&req.version, &than.version) == Ordering::Greater
    })
}

/// Standard major.minor.patch ordering; versions that fail to parse lose
/// to parseable ones and fall back to lexicographic order among
/// themselves.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Comma-separated `name@version` list for the workload environment
pub fn install_list(selected: &[PluginRequirement]) -> String {
    selected
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::store::{ChildKey, OperatorSettings};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn req(name: &str, version: &str) -> PluginRequirement {
        PluginRequirement::new(name, version)
    }

    fn store_with(namespace: &str, reqs: Vec<PluginRequirement>) -> Arc<ConfigStore> {
        let store = Arc::new(ConfigStore::new(OperatorSettings::default()));
        store.set_plugin_requirements(ChildKey::new(namespace, "board"), reqs);
        store
    }

    #[test]
    fn selects_highest_version_per_name() {
        let selected = select_latest(&[
            req("a", "1.0.0"),
            req("a", "1.0.1"),
            req("b", "1.0.0"),
        ]);
        assert_eq!(selected, vec![req("a", "1.0.1"), req("b", "1.0.0")]);
    }

    #[test]
    fn has_newer_version_is_strict() {
        let reqs = [req("a", "1.0.0"), req("a", "1.0.1"), req("b", "1.0.0")];
        assert!(has_newer_version(&reqs, &req("a", "1.0.0")));
        assert!(!has_newer_version(&reqs, &req("a", "1.0.1")));
        assert!(!has_newer_version(&reqs, &req("b", "1.0.0")));
    }

    #[test]
    fn semver_ordering_not_lexicographic() {
        let selected = select_latest(&[req("a", "1.9.0"), req("a", "1.10.0")]);
        assert_eq!(selected, vec![req("a", "1.10.0")]);
    }

    #[test]
    fn install_list_formats_name_at_version() {
        assert_eq!(
            install_list(&[req("a", "1.0.1"), req("b", "1.0.0")]),
            "a@1.0.1,b@1.0.0"
        );
        assert_eq!(install_list(&[]), "");
    }

    #[tokio::test]
    async fn resolution_selects_probes_and_reports_changed() {
        let mut probe = MockRegistryProbe::new();
        probe.expect_exists().returning(|_, _| true);

        let store = store_with(
            "monitoring",
            vec![req("a", "1.0.0"), req("a", "1.0.1"), req("b", "1.0.0")],
        );
        let resolver = PluginResolver::new(Arc::new(probe), store.clone());

        let resolution = resolver.resolve("monitoring/main", "monitoring").await;
        assert_eq!(
            resolution.selected,
            vec![req("a", "1.0.1"), req("b", "1.0.0")]
        );
        assert!(resolution.failed.is_empty());
        assert!(resolution.changed);

        // Identical selection on the next cycle reports changed = false,
        // never conflated with failure.
        let resolution = resolver.resolve("monitoring/main", "monitoring").await;
        assert_eq!(
            resolution.selected,
            vec![req("a", "1.0.1"), req("b", "1.0.0")]
        );
        assert!(!resolution.changed);
    }

    #[tokio::test]
    async fn probe_failure_degrades_only_that_plugin() {
        let mut probe = MockRegistryProbe::new();
        probe
            .expect_exists()
            .returning(|name, _| name != "a");

        let store = store_with(
            "monitoring",
            vec![req("a", "1.0.0"), req("a", "1.0.1"), req("b", "1.0.0")],
        );
        let resolver = PluginResolver::new(Arc::new(probe), store);

        let resolution = resolver.resolve("monitoring/main", "monitoring").await;
        assert_eq!(resolution.selected, vec![req("b", "1.0.0")]);
        assert_eq!(resolution.failed, vec![req("a", "1.0.1")]);
        assert!(resolution.changed);
    }

    #[tokio::test]
    async fn http_probe_treats_non_success_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plugins/piechart/versions/1.0.0"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/plugins/missing/versions/1.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let probe = HttpRegistryProbe::new(
            format!("{}/api/plugins/{{name}}/versions/{{version}}", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(probe.exists("piechart", "1.0.0").await);
        assert!(!probe.exists("missing", "1.0.0").await);
    }
}
