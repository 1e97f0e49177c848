//! Common types for Vigil: CRDs, errors, events, and the shared config store

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use store::ConfigStore;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all Vigil CRDs
pub const API_GROUP: &str = "vigil.dev";

/// Label key carrying the owning instance name on generated resources
pub const LABEL_INSTANCE: &str = "vigil.dev/instance";

/// Standard managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for the managed-by label on everything this operator creates
pub const MANAGED_BY_OPERATOR: &str = "vigil-operator";

/// Annotation holding the last applied config hash on the config ConfigMap
pub const ANNOTATION_CONFIG_HASH: &str = "vigil.dev/config-hash";

/// Environment variable mirroring the config hash into the workload.
///
/// Changing the value changes the pod template byte-for-byte, which forces
/// the workload orchestrator to perform a rolling update.
pub const ENV_CONFIG_HASH: &str = "VIGIL_CONFIG_HASH";

/// Environment variable carrying the consolidated plugin list
pub const ENV_INSTALL_PLUGINS: &str = "VIGIL_INSTALL_PLUGINS";

/// Finalizer placed on child specs that register state with the operator
pub const CHILD_FINALIZER: &str = "vigil.dev/deregister";

/// HTTP port the managed instance listens on
pub const INSTANCE_HTTP_PORT: i32 = 3000;

/// Fixed requeue delay after a failed reconciliation, in seconds
pub const FAILURE_REQUEUE_SECS: u64 = 10;

/// Periodic resync interval for successful reconciliations, in seconds
pub const RESYNC_SECS: u64 = 60;
