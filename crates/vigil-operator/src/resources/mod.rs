//! Builders for the materialized form of every managed resource kind.
//!
//! Builders are pure: they take the `Vigil` spec (plus any per-cycle
//! computed inputs such as the config document) and return the desired
//! object. Owner references are stamped later by the runner, not here, so
//! the builders stay testable without a cluster.

pub mod config_maps;
pub mod deployment;
pub mod ingress;
pub mod route;
pub mod service_account;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use vigil_common::{LABEL_INSTANCE, LABEL_MANAGED_BY, MANAGED_BY_OPERATOR};

/// Name of the config ConfigMap for an instance
pub fn config_map_name(instance: &str) -> String {
    format!("{instance}-config")
}

/// Name of the datasource provisioning ConfigMap for an instance
pub fn datasource_config_map_name(instance: &str) -> String {
    format!("{instance}-datasources")
}

/// Labels stamped on every generated resource
pub fn labels(instance: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string());
    labels.insert(LABEL_INSTANCE.to_string(), instance.to_string());
    labels
}

/// Standard metadata for a generated resource
pub fn object_meta(namespace: &str, name: &str, instance: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(instance)),
        ..ObjectMeta::default()
    }
}
