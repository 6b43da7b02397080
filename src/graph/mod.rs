// src/graph/mod.rs

//! Dependency graph construction, cycle rejection, and wave planning.
//!
//! - [`builder`] turns a job's declared dependency edges into an adjacency
//!   structure with precomputed in/out degrees.
//! - [`cycle`] runs a three-color depth-first search and reports the exact
//!   cycle path when one exists.
//! - [`topo`] computes the deterministic wave-based [`ExecutionPlan`] via
//!   Kahn's algorithm.

pub mod builder;
pub mod cycle;
pub mod topo;

pub use builder::{DependencyEdge, DependencyGraph, DependencyKind, RetryPolicy};
pub use cycle::find_cycle;
pub use topo::{ExecutionPlan, plan_waves};

/// Public type alias for transaction-type identifiers throughout the crate.
pub type TransactionId = String;

/// Tie-break weight applied when a dependency declares none.
pub const DEFAULT_PRIORITY_WEIGHT: u32 = 50;
