//! Point-in-time read of every managed resource for one instance.
//!
//! Each handle is `Some` with the current materialized form or `None` when
//! the resource does not exist; NotFound is the only benign lookup error.
//! Any other failure aborts snapshot construction so the planner never
//! diffs against a partial view.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;
use kube::{Api, Client};

use vigil_common::error::is_not_found;
use vigil_common::{Error, Result};

use crate::resources::route::route_api_resource;
use crate::resources::{config_map_name, datasource_config_map_name};

/// Current cluster state of one instance's managed resources
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    /// Workload ServiceAccount
    pub service_account: Option<ServiceAccount>,
    /// Config ConfigMap
    pub config_map: Option<ConfigMap>,
    /// Datasource provisioning ConfigMap
    pub datasource_config_map: Option<ConfigMap>,
    /// External access Ingress
    pub ingress: Option<Ingress>,
    /// External access Route; only read when the Route API is available
    pub route: Option<DynamicObject>,
    /// Workload Deployment
    pub deployment: Option<Deployment>,
}

impl ClusterSnapshot {
    /// Read the snapshot for the named instance.
    ///
    /// `read_route` gates the Route lookup: querying an API the cluster
    /// does not serve would fail the whole snapshot.
    pub async fn read(
        client: &Client,
        namespace: &str,
        instance: &str,
        read_route: bool,
    ) -> Result<Self> {
        let service_accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

        let route = if read_route {
            let routes: Api<DynamicObject> =
                Api::namespaced_with(client.clone(), namespace, &route_api_resource());
            get_opt(&routes, instance).await?
        } else {
            None
        };

        Ok(Self {
            service_account: get_opt(&service_accounts, instance).await?,
            config_map: get_opt(&config_maps, &config_map_name(instance)).await?,
            datasource_config_map: get_opt(&config_maps, &datasource_config_map_name(instance))
                .await?,
            ingress: get_opt(&ingresses, instance).await?,
            route,
            deployment: get_opt(&deployments, instance).await?,
        })
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(resource) => Ok(Some(resource)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}
