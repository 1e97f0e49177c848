//! Pure diff of desired state against a snapshot.
//!
//! Planning performs no I/O: every cluster read happens before (snapshot,
//! store lookups, config serialization) and every write after (runner).
//! Running the planner twice over the same inputs yields the same list.
//!
//! Ordering invariant: config-bearing resources precede the workload so a
//! fresh pod never starts against stale config, and readiness checks come
//! last so they halt only after all writes of the cycle were attempted.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;

use vigil_common::crd::{PluginRequirement, Vigil};

use super::action::{ClusterAction, DesiredResource, ManagedKind, ResourceRef};
use super::snapshot::ClusterSnapshot;
use crate::inifile::ConfigDocument;
use crate::plugins::install_list;
use crate::resources::{config_maps, deployment, ingress, route, service_account};

/// Everything the planner needs, gathered up front
pub struct PlannerInput<'a> {
    /// The owning instance spec
    pub vigil: &'a Vigil,
    /// Namespace of the instance
    pub namespace: &'a str,
    /// Name of the instance
    pub instance: &'a str,
    /// Current cluster state
    pub snapshot: &'a ClusterSnapshot,
    /// Serialized config; `None` when serialization failed upstream, in
    /// which case no config action is planned
    pub config: Option<&'a ConfigDocument>,
    /// Datasource provisioning files for the namespace
    pub datasources: &'a BTreeMap<String, String>,
    /// Consolidated plugin set for the workload
    pub plugins: &'a [PluginRequirement],
    /// Whether the Route API is available (Route preferred over Ingress)
    pub use_route: bool,
}

/// Produce the ordered action list for one cycle
pub fn plan(input: &PlannerInput<'_>) -> Vec<ClusterAction> {
    let PlannerInput {
        vigil,
        namespace,
        instance,
        snapshot,
        config,
        datasources,
        plugins,
        use_route,
    } = input;

    let mut actions = Vec::new();

    actions.extend(upsert(
        snapshot.service_account.as_ref(),
        service_account::service_account(namespace, instance),
        |cur, des| {
            let mut merged = cur.clone();
            merged.metadata = merge_meta(&cur.metadata, &des.metadata);
            merged
        },
        DesiredResource::ServiceAccount,
        "service account",
    ));

    if let Some(doc) = config {
        actions.extend(upsert(
            snapshot.config_map.as_ref(),
            config_maps::config_map(namespace, instance, doc),
            |cur, des| {
                let mut merged = cur.clone();
                merged.metadata = merge_meta(&cur.metadata, &des.metadata);
                merged.data = des.data.clone();
                merged
            },
            DesiredResource::ConfigMap,
            "config",
        ));
    }

    actions.extend(upsert(
        snapshot.datasource_config_map.as_ref(),
        config_maps::datasource_config_map(namespace, instance, datasources),
        |cur, des| {
            let mut merged = cur.clone();
            merged.metadata = merge_meta(&cur.metadata, &des.metadata);
            merged.data = des.data.clone();
            merged
        },
        DesiredResource::ConfigMap,
        "datasources",
    ));

    if let Some(workload) = &vigil.spec.workload {
        for secret in &workload.env_from_secrets {
            actions.push(ClusterAction::ExposeSecretVar {
                name: secret.clone(),
            });
        }
        for config_map in &workload.env_from_config_maps {
            actions.push(ClusterAction::ExposeConfigMapVar {
                name: config_map.clone(),
            });
        }
    }

    plan_external_access(input, &mut actions);

    actions.push(ClusterAction::Log {
        message: if plugins.is_empty() {
            "no plugins selected".to_string()
        } else {
            format!("effective plugin set: {}", install_list(plugins))
        },
    });

    actions.extend(upsert(
        snapshot.deployment.as_ref(),
        deployment::deployment(
            namespace,
            instance,
            vigil,
            config.map(|d| d.hash.as_str()),
            plugins,
        ),
        |cur, des| {
            let mut merged = cur.clone();
            merged.metadata = merge_meta(&cur.metadata, &des.metadata);
            merged.spec = des.spec.clone();
            merged
        },
        DesiredResource::Deployment,
        "workload",
    ));

    if vigil.external_access_enabled() && !vigil.prefers_service() {
        if *use_route {
            actions.push(ClusterAction::CheckRouteReady {
                name: instance.to_string(),
            });
        } else {
            actions.push(ClusterAction::CheckIngressReady {
                name: instance.to_string(),
            });
        }
    }
    actions.push(ClusterAction::CheckDeploymentReady {
        name: instance.to_string(),
    });

    actions
}

fn plan_external_access(input: &PlannerInput<'_>, actions: &mut Vec<ClusterAction>) {
    let PlannerInput {
        vigil,
        namespace,
        instance,
        snapshot,
        use_route,
        ..
    } = input;

    if !vigil.external_access_enabled() {
        if snapshot.ingress.is_some() {
            actions.push(ClusterAction::Delete {
                target: ResourceRef::new(ManagedKind::Ingress, *instance),
                message: "external access disabled".to_string(),
            });
        }
        if snapshot.route.is_some() {
            actions.push(ClusterAction::Delete {
                target: ResourceRef::new(ManagedKind::Route, *instance),
                message: "external access disabled".to_string(),
            });
        }
        return;
    }

    if *use_route {
        actions.extend(upsert_route(
            snapshot.route.as_ref(),
            route::route(namespace, instance, vigil),
        ));
        if snapshot.ingress.is_some() {
            actions.push(ClusterAction::Delete {
                target: ResourceRef::new(ManagedKind::Ingress, *instance),
                message: "superseded by route".to_string(),
            });
        }
    } else {
        actions.extend(upsert(
            snapshot.ingress.as_ref(),
            ingress::ingress(namespace, instance, vigil),
            |cur, des| {
                let mut merged = cur.clone();
                merged.metadata = merge_meta(&cur.metadata, &des.metadata);
                merged.spec = des.spec.clone();
                merged
            },
            DesiredResource::Ingress,
            "external access",
        ));
        if snapshot.route.is_some() {
            actions.push(ClusterAction::Delete {
                target: ResourceRef::new(ManagedKind::Route, *instance),
                message: "route api no longer preferred".to_string(),
            });
        }
    }
}

/// Create when absent; otherwise overwrite owned fields into a clone of
/// the current object and update only when that changed anything.
fn upsert<T: Clone + PartialEq>(
    current: Option<&T>,
    desired: T,
    merge: impl Fn(&T, &T) -> T,
    wrap: impl Fn(T) -> DesiredResource,
    what: &str,
) -> Option<ClusterAction> {
    match current {
        None => Some(ClusterAction::Create {
            resource: wrap(desired),
            message: format!("{what} absent"),
        }),
        Some(current) => {
            let merged = merge(current, &desired);
            if &merged == current {
                None
            } else {
                Some(ClusterAction::Update {
                    resource: wrap(merged),
                    message: format!("{what} drifted"),
                })
            }
        }
    }
}

// DynamicObject has no PartialEq; compare through its JSON value.
fn upsert_route(current: Option<&DynamicObject>, desired: DynamicObject) -> Option<ClusterAction> {
    match current {
        None => Some(ClusterAction::Create {
            resource: DesiredResource::Route(desired),
            message: "external access absent".to_string(),
        }),
        Some(current) => {
            let mut merged = current.clone();
            merged.metadata = merge_meta(&current.metadata, &desired.metadata);
            merged.data = desired.data.clone();
            let unchanged = serde_json::to_value(&merged).ok()
                == serde_json::to_value(current).ok();
            if unchanged {
                None
            } else {
                Some(ClusterAction::Update {
                    resource: DesiredResource::Route(merged),
                    message: "external access drifted".to_string(),
                })
            }
        }
    }
}

/// Union of current and desired labels/annotations, desired winning per
/// key; foreign metadata (resourceVersion, uid, user labels) survives.
fn merge_meta(current: &ObjectMeta, desired: &ObjectMeta) -> ObjectMeta {
    let mut merged = current.clone();
    if let Some(desired_labels) = &desired.labels {
        let labels = merged.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in desired_labels {
            labels.insert(k.clone(), v.clone());
        }
    }
    if let Some(desired_annotations) = &desired.annotations {
        let annotations = merged.annotations.get_or_insert_with(BTreeMap::new);
        for (k, v) in desired_annotations {
            annotations.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inifile;
    use vigil_common::crd::{
        ClientSpec, ConfigSections, ExternalAccessSpec, VigilSpec, WorkloadSpec,
    };

    fn spec_with_access() -> VigilSpec {
        VigilSpec {
            config: Some(ConfigSections::new()),
            external_access: Some(ExternalAccessSpec {
                hostname: Some("viz.example.com".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn kinds(actions: &[ClusterAction]) -> Vec<String> {
        actions.iter().map(describe_kind).collect()
    }

    fn describe_kind(action: &ClusterAction) -> String {
        match action {
            ClusterAction::Create { resource, .. } => {
                format!("create:{}/{}", resource.kind(), resource.name())
            }
            ClusterAction::Update { resource, .. } => {
                format!("update:{}/{}", resource.kind(), resource.name())
            }
            ClusterAction::Delete { target, .. } => format!("delete:{target}"),
            ClusterAction::ExposeSecretVar { name } => format!("expose-secret:{name}"),
            ClusterAction::ExposeConfigMapVar { name } => format!("expose-configmap:{name}"),
            ClusterAction::CheckRouteReady { .. } => "check:route".to_string(),
            ClusterAction::CheckIngressReady { .. } => "check:ingress".to_string(),
            ClusterAction::CheckDeploymentReady { .. } => "check:deployment".to_string(),
            ClusterAction::Log { .. } => "log".to_string(),
        }
    }

    fn materialize(actions: &[ClusterAction], snapshot: &mut ClusterSnapshot) {
        for action in actions {
            let resource = match action {
                ClusterAction::Create { resource, .. } => resource,
                ClusterAction::Update { resource, .. } => resource,
                _ => continue,
            };
            match resource {
                DesiredResource::ServiceAccount(r) => {
                    snapshot.service_account = Some(r.clone());
                }
                DesiredResource::ConfigMap(r) => {
                    if r.metadata.name.as_deref().is_some_and(|n| n.ends_with("-config")) {
                        snapshot.config_map = Some(r.clone());
                    } else {
                        snapshot.datasource_config_map = Some(r.clone());
                    }
                }
                DesiredResource::Deployment(r) => snapshot.deployment = Some(r.clone()),
                DesiredResource::Ingress(r) => snapshot.ingress = Some(r.clone()),
                DesiredResource::Route(r) => snapshot.route = Some(r.clone()),
            }
        }
    }

    #[test]
    fn fresh_instance_plans_in_the_documented_order() {
        let mut spec = spec_with_access();
        spec.client = Some(ClientSpec {
            prefer_service: Some(true),
            ..Default::default()
        });
        let vigil = Vigil::new("main", spec);
        let doc = inifile::serialize(&ConfigSections::new()).unwrap();
        let snapshot = ClusterSnapshot::default();
        let plugins = [PluginRequirement::new("piechart", "1.0.1")];

        let actions = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &snapshot,
            config: Some(&doc),
            datasources: &BTreeMap::new(),
            plugins: &plugins,
            use_route: false,
        });

        assert_eq!(
            kinds(&actions),
            vec![
                "create:ServiceAccount/main",
                "create:ConfigMap/main-config",
                "create:ConfigMap/main-datasources",
                "create:Ingress/main",
                "log",
                "create:Deployment/main",
                "check:deployment",
            ]
        );
    }

    #[test]
    fn replanning_over_materialized_state_emits_no_writes() {
        let vigil = Vigil::new("main", spec_with_access());
        let doc = inifile::serialize(&ConfigSections::new()).unwrap();
        let mut snapshot = ClusterSnapshot::default();

        let input = |snapshot: &ClusterSnapshot| {
            plan(&PlannerInput {
                vigil: &vigil,
                namespace: "monitoring",
                instance: "main",
                snapshot,
                config: Some(&doc),
                datasources: &BTreeMap::new(),
                plugins: &[],
                use_route: false,
            })
        };

        let first = input(&snapshot);
        materialize(&first, &mut snapshot);

        let second = input(&snapshot);
        assert_eq!(kinds(&second), vec!["log", "check:ingress", "check:deployment"]);
    }

    #[test]
    fn serialization_failure_omits_the_config_action() {
        let vigil = Vigil::new("main", VigilSpec::default());
        let actions = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &ClusterSnapshot::default(),
            config: None,
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: false,
        });

        assert!(!kinds(&actions)
            .iter()
            .any(|k| k.contains("ConfigMap/main-config")));
        // Everything else still proceeds.
        assert!(kinds(&actions).contains(&"create:Deployment/main".to_string()));
    }

    #[test]
    fn disabled_access_deletes_stale_resources() {
        let vigil = Vigil::new("main", VigilSpec::default());
        let mut snapshot = ClusterSnapshot::default();
        snapshot.ingress = Some(ingress::ingress("monitoring", "main", &vigil));

        let actions = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &snapshot,
            config: None,
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: false,
        });

        assert!(kinds(&actions).contains(&"delete:Ingress/main".to_string()));
        // No access readiness check when access is off.
        assert!(!kinds(&actions).contains(&"check:ingress".to_string()));
    }

    #[test]
    fn route_api_supersedes_ingress() {
        let vigil = Vigil::new("main", spec_with_access());
        let mut snapshot = ClusterSnapshot::default();
        snapshot.ingress = Some(ingress::ingress("monitoring", "main", &vigil));

        let actions = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &snapshot,
            config: None,
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: true,
        });

        let kinds = kinds(&actions);
        assert!(kinds.contains(&"create:Route/main".to_string()));
        assert!(kinds.contains(&"delete:Ingress/main".to_string()));
        assert!(kinds.contains(&"check:route".to_string()));
    }

    #[test]
    fn env_from_sources_are_checked_before_the_workload() {
        let vigil = Vigil::new(
            "main",
            VigilSpec {
                workload: Some(WorkloadSpec {
                    env_from_secrets: vec!["db-creds".to_string()],
                    env_from_config_maps: vec!["extra".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let actions = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &ClusterSnapshot::default(),
            config: None,
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: false,
        });

        let kinds = kinds(&actions);
        let expose = kinds
            .iter()
            .position(|k| k == "expose-secret:db-creds")
            .unwrap();
        let expose_cm = kinds
            .iter()
            .position(|k| k == "expose-configmap:extra")
            .unwrap();
        let workload = kinds
            .iter()
            .position(|k| k == "create:Deployment/main")
            .unwrap();
        assert!(expose < workload);
        assert!(expose_cm < workload);
    }

    #[test]
    fn config_change_updates_the_map_and_the_workload() {
        let vigil = Vigil::new("main", spec_with_access());
        let doc_a = inifile::serialize(&ConfigSections::from([(
            "server".to_string(),
            [("http_port".to_string(), "3000".to_string())].into(),
        )]))
        .unwrap();

        let mut snapshot = ClusterSnapshot::default();
        let first = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &snapshot,
            config: Some(&doc_a),
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: false,
        });
        materialize(&first, &mut snapshot);

        let doc_b = inifile::serialize(&ConfigSections::from([(
            "server".to_string(),
            [("http_port".to_string(), "3001".to_string())].into(),
        )]))
        .unwrap();
        let second = plan(&PlannerInput {
            vigil: &vigil,
            namespace: "monitoring",
            instance: "main",
            snapshot: &snapshot,
            config: Some(&doc_b),
            datasources: &BTreeMap::new(),
            plugins: &[],
            use_route: false,
        });

        let kinds = kinds(&second);
        let config = kinds
            .iter()
            .position(|k| k == "update:ConfigMap/main-config")
            .unwrap();
        let workload = kinds
            .iter()
            .position(|k| k == "update:Deployment/main")
            .unwrap();
        // New config lands before the workload restart that consumes it.
        assert!(config < workload);
    }
}
