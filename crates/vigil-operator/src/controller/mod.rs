//! Controllers for the `Vigil` CRD family.
//!
//! The instance controller owns the snapshot-diff-execute cycle; the
//! three child controllers (dashboard, datasource, channel) validate
//! their spec content, feed the shared store, and submit entities to the
//! running instance through its admin API.

pub mod channel;
pub mod dashboard;
pub mod datasource;
pub mod instance;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde_json::{json, Value};

use vigil_client::{AdminApiClient, Credentials};
use vigil_common::{Error, Result, CHILD_FINALIZER};

use crate::statebus::OperationalFacts;

/// Field manager name used for all patches issued by this operator
pub const FIELD_MANAGER: &str = "vigil-operator";

/// How long a child controller waits for operational facts before
/// requeueing. Matches the watch timeout so a stalled wait never outlives
/// the watch it came from.
pub const FACTS_WAIT: Duration = Duration::from_secs(25);

/// Object reference for event publication
pub fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: obj.meta().name.clone(),
        namespace: obj.meta().namespace.clone(),
        uid: obj.meta().uid.clone(),
        ..ObjectReference::default()
    }
}

/// Ensure the deregistration finalizer is present.
///
/// Returns true when the finalizer was just added, in which case the
/// caller should requeue and let the patched object come back around.
pub async fn ensure_finalizer<K>(api: &Api<K>, obj: &K) -> Result<bool>
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    let mut finalizers = obj.finalizers().to_vec();
    if finalizers.iter().any(|f| f == CHILD_FINALIZER) {
        return Ok(false);
    }
    finalizers.push(CHILD_FINALIZER.to_string());

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(true)
}

/// Remove the deregistration finalizer, letting deletion complete.
pub async fn remove_finalizer<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != CHILD_FINALIZER)
        .cloned()
        .collect();

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &obj.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Seam between the child controllers and the instance's admin API.
///
/// Every call takes the current operational facts so the gateway always
/// targets the URL and credentials of the latest successful cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminGateway: Send + Sync {
    /// Create or update a dashboard under the given uid
    async fn apply_dashboard(
        &self,
        facts: &OperationalFacts,
        uid: &str,
        document: Value,
        folder: Option<String>,
    ) -> Result<()>;

    /// Remove a dashboard; absence is not an error
    async fn delete_dashboard(&self, facts: &OperationalFacts, uid: &str) -> Result<()>;

    /// Create or update a notification channel under the given uid
    async fn apply_channel(&self, facts: &OperationalFacts, uid: &str, document: Value)
        -> Result<()>;

    /// Remove a notification channel; absence is not an error
    async fn delete_channel(&self, facts: &OperationalFacts, uid: &str) -> Result<()>;
}

/// Gateway over `vigil_client::AdminApiClient`.
pub struct HttpAdminGateway;

impl HttpAdminGateway {
    fn client(facts: &OperationalFacts) -> Result<AdminApiClient> {
        AdminApiClient::new(
            facts.admin_url.clone(),
            Credentials {
                username: facts.admin_user.clone(),
                password: facts.admin_password.clone(),
            },
            facts.client_timeout,
        )
        .map_err(|e| Error::internal_with_context("admin-api", e.to_string()))
    }
}

#[async_trait]
impl AdminGateway for HttpAdminGateway {
    async fn apply_dashboard(
        &self,
        facts: &OperationalFacts,
        uid: &str,
        document: Value,
        folder: Option<String>,
    ) -> Result<()> {
        Self::client(facts)?
            .apply_dashboard(uid, document, folder.as_deref())
            .await
            .map_err(|e| Error::internal_with_context("admin-api", e.to_string()))
    }

    async fn delete_dashboard(&self, facts: &OperationalFacts, uid: &str) -> Result<()> {
        Self::client(facts)?
            .delete_dashboard(uid)
            .await
            .map_err(|e| Error::internal_with_context("admin-api", e.to_string()))
    }

    async fn apply_channel(
        &self,
        facts: &OperationalFacts,
        uid: &str,
        document: Value,
    ) -> Result<()> {
        Self::client(facts)?
            .apply_channel(uid, document)
            .await
            .map_err(|e| Error::internal_with_context("admin-api", e.to_string()))
    }

    async fn delete_channel(&self, facts: &OperationalFacts, uid: &str) -> Result<()> {
        Self::client(facts)?
            .delete_channel(uid)
            .await
            .map_err(|e| Error::internal_with_context("admin-api", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::Vigil;

    #[test]
    fn object_reference_carries_identity() {
        let vigil = Vigil::new("main", Default::default());
        let obj_ref = object_reference(&vigil);
        assert_eq!(obj_ref.kind.as_deref(), Some("Vigil"));
        assert_eq!(obj_ref.api_version.as_deref(), Some("vigil.dev/v1alpha1"));
        assert_eq!(obj_ref.name.as_deref(), Some("main"));
    }
}
