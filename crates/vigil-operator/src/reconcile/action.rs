//! The closed vocabulary of actions a reconciliation cycle can take.
//!
//! Every action is idempotent. I/O variants carry either the full desired
//! resource or a typed reference; check variants carry only a name. The
//! runner interprets the vocabulary, the planner only emits it.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::DynamicObject;

/// Managed resource kinds, one per snapshot handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagedKind {
    /// Workload ServiceAccount
    ServiceAccount,
    /// Config or datasource ConfigMap
    ConfigMap,
    /// Workload Deployment
    Deployment,
    /// External access Ingress
    Ingress,
    /// External access Route (optional API)
    Route,
}

impl std::fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManagedKind::ServiceAccount => "ServiceAccount",
            ManagedKind::ConfigMap => "ConfigMap",
            ManagedKind::Deployment => "Deployment",
            ManagedKind::Ingress => "Ingress",
            ManagedKind::Route => "Route",
        };
        f.write_str(s)
    }
}

/// A fully materialized desired resource, ready to create or update
#[derive(Clone, Debug)]
pub enum DesiredResource {
    /// Desired ServiceAccount
    ServiceAccount(ServiceAccount),
    /// Desired ConfigMap (config or datasources)
    ConfigMap(ConfigMap),
    /// Desired Deployment
    Deployment(Deployment),
    /// Desired Ingress
    Ingress(Ingress),
    /// Desired Route as a dynamic object
    Route(DynamicObject),
}

impl DesiredResource {
    /// The managed kind of this resource
    pub fn kind(&self) -> ManagedKind {
        match self {
            DesiredResource::ServiceAccount(_) => ManagedKind::ServiceAccount,
            DesiredResource::ConfigMap(_) => ManagedKind::ConfigMap,
            DesiredResource::Deployment(_) => ManagedKind::Deployment,
            DesiredResource::Ingress(_) => ManagedKind::Ingress,
            DesiredResource::Route(_) => ManagedKind::Route,
        }
    }

    /// Object name, empty if unset (builders always set it)
    pub fn name(&self) -> String {
        let name = match self {
            DesiredResource::ServiceAccount(r) => r.metadata.name.as_deref(),
            DesiredResource::ConfigMap(r) => r.metadata.name.as_deref(),
            DesiredResource::Deployment(r) => r.metadata.name.as_deref(),
            DesiredResource::Ingress(r) => r.metadata.name.as_deref(),
            DesiredResource::Route(r) => r.metadata.name.as_deref(),
        };
        name.unwrap_or_default().to_string()
    }
}

/// Typed reference to a managed resource, used by Delete
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    /// Kind of the referenced resource
    pub kind: ManagedKind,
    /// Name of the referenced resource
    pub name: String,
}

impl ResourceRef {
    /// Build a reference
    pub fn new(kind: ManagedKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One step of a reconciliation cycle
#[derive(Clone, Debug)]
pub enum ClusterAction {
    /// Create a resource that is currently absent
    Create {
        /// The resource to create
        resource: DesiredResource,
        /// Human-readable description for logs
        message: String,
    },
    /// Update a present resource whose operator-owned fields drifted
    Update {
        /// The merged resource to write back
        resource: DesiredResource,
        /// Human-readable description for logs
        message: String,
    },
    /// Delete a resource that is present but no longer requested
    Delete {
        /// The resource to delete
        target: ResourceRef,
        /// Human-readable description for logs
        message: String,
    },
    /// Verify a referenced Secret exists before the workload mounts it
    ExposeSecretVar {
        /// Secret name from the workload spec
        name: String,
    },
    /// Verify a referenced ConfigMap exists before the workload mounts it
    ExposeConfigMapVar {
        /// ConfigMap name from the workload spec
        name: String,
    },
    /// Halt the cycle until the Route has been admitted
    CheckRouteReady {
        /// Route name
        name: String,
    },
    /// Halt the cycle until the Ingress has an address
    CheckIngressReady {
        /// Ingress name
        name: String,
    },
    /// Halt the cycle until the Deployment has ready replicas
    CheckDeploymentReady {
        /// Deployment name
        name: String,
    },
    /// Record a message in the operator log, no cluster effect
    Log {
        /// The message to record
        message: String,
    },
}

impl ClusterAction {
    /// Short description used in per-action logging
    pub fn describe(&self) -> String {
        match self {
            ClusterAction::Create { resource, message } => {
                format!("create {}/{}: {message}", resource.kind(), resource.name())
            }
            ClusterAction::Update { resource, message } => {
                format!("update {}/{}: {message}", resource.kind(), resource.name())
            }
            ClusterAction::Delete { target, message } => format!("delete {target}: {message}"),
            ClusterAction::ExposeSecretVar { name } => format!("expose secret {name}"),
            ClusterAction::ExposeConfigMapVar { name } => format!("expose configmap {name}"),
            ClusterAction::CheckRouteReady { name } => format!("check route/{name} ready"),
            ClusterAction::CheckIngressReady { name } => format!("check ingress/{name} ready"),
            ClusterAction::CheckDeploymentReady { name } => {
                format!("check deployment/{name} ready")
            }
            ClusterAction::Log { message } => format!("log: {message}"),
        }
    }
}
