//! Sequential executor for a planned action list.
//!
//! Actions run in order and the first non-benign failure stops the run;
//! remaining actions are simply retried on the next cycle once the
//! snapshot reflects whatever did complete. Two failures are benign:
//! update conflicts (someone else wrote first, the next cycle re-reads and
//! re-diffs) and readiness checks that have not passed yet (`NotReady`,
//! which requeues after a fixed delay).

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, DynamicObject, PostParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use vigil_common::error::{is_conflict, is_not_found};
use vigil_common::{Error, Result};

use super::action::{ClusterAction, DesiredResource, ManagedKind, ResourceRef};
use crate::resources::route::route_api_resource;

/// Write-side seam between the runner and the cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource
    async fn create(&self, resource: &DesiredResource) -> Result<()>;
    /// Replace a resource with its merged desired form
    async fn update(&self, resource: &DesiredResource) -> Result<()>;
    /// Delete a resource; absence is benign
    async fn delete(&self, target: &ResourceRef) -> Result<()>;
    /// Whether the named Secret exists
    async fn has_secret(&self, name: &str) -> Result<bool>;
    /// Whether the named ConfigMap exists
    async fn has_config_map(&self, name: &str) -> Result<bool>;
    /// Whether the Deployment reports at least one ready replica
    async fn deployment_ready(&self, name: &str) -> Result<bool>;
    /// Whether the Ingress has been assigned an address
    async fn ingress_ready(&self, name: &str) -> Result<bool>;
    /// Whether the Route has been admitted
    async fn route_ready(&self, name: &str) -> Result<bool>;
}

/// Executes one cycle's actions against a store.
pub struct ActionRunner {
    store: Arc<dyn ResourceStore>,
    token: CancellationToken,
}

impl ActionRunner {
    /// Build a runner over a store; the token aborts between actions.
    pub fn new(store: Arc<dyn ResourceStore>, token: CancellationToken) -> Self {
        Self { store, token }
    }

    /// Run the list in order, fail-fast. No compensation on abort: the
    /// next cycle re-reads and re-plans from whatever state remains.
    pub async fn run_all(&self, actions: &[ClusterAction]) -> Result<()> {
        for (index, action) in actions.iter().enumerate() {
            if self.token.is_cancelled() {
                return Err(Error::internal_with_context(
                    "runner",
                    "cancelled mid-cycle, remaining actions dropped",
                ));
            }
            debug!(index, action = %action.describe(), "running action");
            self.run_one(action).await?;
            info!(index, outcome = "ok", action = %action.describe(), "action complete");
        }
        Ok(())
    }

    async fn run_one(&self, action: &ClusterAction) -> Result<()> {
        match action {
            ClusterAction::Create { resource, .. } => self.store.create(resource).await,
            ClusterAction::Update { resource, .. } => {
                match self.store.update(resource).await {
                    Err(Error::Kube { source }) if is_conflict(&source) => {
                        debug!(
                            name = %resource.name(),
                            "update conflict, re-diffing next cycle"
                        );
                        Ok(())
                    }
                    other => other,
                }
            }
            ClusterAction::Delete { target, .. } => self.store.delete(target).await,
            ClusterAction::ExposeSecretVar { name } => {
                if self.store.has_secret(name).await? {
                    Ok(())
                } else {
                    Err(Error::not_ready(
                        format!("secret/{name}"),
                        "referenced secret does not exist",
                    ))
                }
            }
            ClusterAction::ExposeConfigMapVar { name } => {
                if self.store.has_config_map(name).await? {
                    Ok(())
                } else {
                    Err(Error::not_ready(
                        format!("configmap/{name}"),
                        "referenced configmap does not exist",
                    ))
                }
            }
            ClusterAction::CheckRouteReady { name } => {
                if self.store.route_ready(name).await? {
                    Ok(())
                } else {
                    Err(Error::not_ready(format!("route/{name}"), "not admitted"))
                }
            }
            ClusterAction::CheckIngressReady { name } => {
                if self.store.ingress_ready(name).await? {
                    Ok(())
                } else {
                    Err(Error::not_ready(
                        format!("ingress/{name}"),
                        "no address assigned",
                    ))
                }
            }
            ClusterAction::CheckDeploymentReady { name } => {
                if self.store.deployment_ready(name).await? {
                    Ok(())
                } else {
                    Err(Error::not_ready(
                        format!("deployment/{name}"),
                        "no ready replicas",
                    ))
                }
            }
            ClusterAction::Log { message } => {
                info!("{message}");
                Ok(())
            }
        }
    }
}

/// Store implementation against the Kubernetes API.
///
/// Create and update stamp the owner reference of the parent instance so
/// garbage collection removes everything when the instance goes away.
pub struct KubeResourceStore {
    client: Client,
    namespace: String,
    owner: OwnerReference,
}

impl KubeResourceStore {
    /// Build a store scoped to one namespace and owner
    pub fn new(client: Client, namespace: impl Into<String>, owner: OwnerReference) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            owner,
        }
    }

    fn stamp(&self, meta: &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) {
        meta.owner_references = Some(vec![self.owner.clone()]);
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn route_api(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &route_api_resource())
    }

    async fn write(&self, resource: &DesiredResource, replace: bool) -> Result<()> {
        let pp = PostParams::default();
        match resource {
            DesiredResource::ServiceAccount(r) => {
                let mut r = r.clone();
                self.stamp(&mut r.metadata);
                self.submit(&self.api::<ServiceAccount>(), r, replace, &pp).await
            }
            DesiredResource::ConfigMap(r) => {
                let mut r = r.clone();
                self.stamp(&mut r.metadata);
                self.submit(&self.api::<ConfigMap>(), r, replace, &pp).await
            }
            DesiredResource::Deployment(r) => {
                let mut r = r.clone();
                self.stamp(&mut r.metadata);
                self.submit(&self.api::<Deployment>(), r, replace, &pp).await
            }
            DesiredResource::Ingress(r) => {
                let mut r = r.clone();
                self.stamp(&mut r.metadata);
                self.submit(&self.api::<Ingress>(), r, replace, &pp).await
            }
            DesiredResource::Route(r) => {
                let mut r = r.clone();
                self.stamp(&mut r.metadata);
                self.submit(&self.route_api(), r, replace, &pp).await
            }
        }
    }

    async fn submit<K>(&self, api: &Api<K>, resource: K, replace: bool, pp: &PostParams) -> Result<()>
    where
        K: Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned + kube::Resource,
    {
        if replace {
            let name = resource
                .meta()
                .name
                .clone()
                .ok_or_else(|| Error::internal_with_context("runner", "resource without a name"))?;
            api.replace(&name, pp, &resource).await?;
        } else {
            api.create(pp, &resource).await?;
        }
        Ok(())
    }

    async fn exists<K>(&self, api: &Api<K>, name: &str) -> Result<bool>
    where
        K: Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    {
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn create(&self, resource: &DesiredResource) -> Result<()> {
        self.write(resource, false).await
    }

    async fn update(&self, resource: &DesiredResource) -> Result<()> {
        self.write(resource, true).await
    }

    async fn delete(&self, target: &ResourceRef) -> Result<()> {
        let dp = DeleteParams::default();
        let result = match target.kind {
            ManagedKind::ServiceAccount => self
                .api::<ServiceAccount>()
                .delete(&target.name, &dp)
                .await
                .map(|_| ()),
            ManagedKind::ConfigMap => self
                .api::<ConfigMap>()
                .delete(&target.name, &dp)
                .await
                .map(|_| ()),
            ManagedKind::Deployment => self
                .api::<Deployment>()
                .delete(&target.name, &dp)
                .await
                .map(|_| ()),
            ManagedKind::Ingress => self
                .api::<Ingress>()
                .delete(&target.name, &dp)
                .await
                .map(|_| ()),
            ManagedKind::Route => self.route_api().delete(&target.name, &dp).await.map(|_| ()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn has_secret(&self, name: &str) -> Result<bool> {
        self.exists(&self.api::<Secret>(), name).await
    }

    async fn has_config_map(&self, name: &str) -> Result<bool> {
        self.exists(&self.api::<ConfigMap>(), name).await
    }

    async fn deployment_ready(&self, name: &str) -> Result<bool> {
        let deployment = self.api::<Deployment>().get(name).await?;
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Ok(ready > 0)
    }

    async fn ingress_ready(&self, name: &str) -> Result<bool> {
        let ingress = self.api::<Ingress>().get(name).await?;
        let has_address = ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .is_some_and(|entries| !entries.is_empty());
        Ok(has_address)
    }

    async fn route_ready(&self, name: &str) -> Result<bool> {
        let route = self.route_api().get(name).await?;
        // A Route is admitted once its status carries at least one ingress
        // entry with an Admitted=True condition.
        let admitted = route.data["status"]["ingress"]
            .as_array()
            .is_some_and(|entries| {
                entries.iter().any(|entry| {
                    entry["conditions"].as_array().is_some_and(|conditions| {
                        conditions
                            .iter()
                            .any(|c| c["type"] == "Admitted" && c["status"] == "True")
                    })
                })
            });
        Ok(admitted)
    }
}
