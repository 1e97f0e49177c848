//! Custom Resource Definitions for the Vigil operator
//!
//! Four CRDs drive the operator: the owning `Vigil` instance spec and three
//! child specs (dashboards, datasources, notification channels) that attach
//! content to a running instance.

mod channel;
mod dashboard;
mod datasource;
mod instance;
mod types;

pub use channel::{VigilNotificationChannel, VigilNotificationChannelSpec};
pub use dashboard::{VigilDashboard, VigilDashboardSpec};
pub use datasource::{VigilDatasource, VigilDatasourceSpec};
pub use instance::{
    ClientSpec, ConfigSections, DashboardSelector, ExternalAccessSpec, Vigil, VigilSpec,
    VigilStatus, WorkloadSpec,
};
pub use types::{ChildPhase, ChildStatus, Condition, ConditionStatus, PluginRequirement, VigilPhase};
