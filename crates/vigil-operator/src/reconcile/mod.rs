//! The snapshot-diff-execute reconciliation core.
//!
//! `snapshot` reads the current materialized form of every managed kind,
//! `plan` diffs it against the spec into an ordered action list, and
//! `runner` executes that list sequentially and fail-fast. The planner is
//! pure; all I/O sits at the edges.

pub mod action;
pub mod plan;
pub mod runner;
pub mod snapshot;

pub use action::{ClusterAction, DesiredResource, ManagedKind, ResourceRef};
pub use plan::{plan, PlannerInput};
pub use runner::{ActionRunner, KubeResourceStore, ResourceStore};
pub use snapshot::ClusterSnapshot;
