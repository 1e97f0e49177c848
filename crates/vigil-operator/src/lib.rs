//! Vigil operator: reconciliation core and controllers
//!
//! The reconciliation core is a snapshot-diff-execute engine: each cycle
//! reads the current materialized form of every managed resource kind for
//! one `Vigil` instance, diffs it against the spec into an ordered list of
//! idempotent actions, and executes the list fail-fast. Cross-controller
//! coordination (plugin consolidation, capability discovery, operational
//! facts) lives beside it.

#![deny(missing_docs)]

pub mod capability;
pub mod controller;
pub mod controller_runner;
pub mod inifile;
pub mod plugins;
pub mod reconcile;
pub mod resources;
pub mod statebus;
