// src/state/mod.rs

//! Per-execution runtime state.
//!
//! - [`node`] holds the in-memory arena of execution graph nodes.
//! - [`machine`] is the per-edge dependency state machine (timeouts, retries).
//! - [`tracker`] drives both for one execution: it applies transaction
//!   outcomes, evaluates timeouts on ticks, cascades cancellation, and
//!   reports every transition for auditing.

pub mod machine;
pub mod node;
pub mod tracker;

pub use machine::{DependencyState, DependencyStatus, TransactionState};
pub use node::{ExecutionGraphNode, NodeArena, NodeColor};
pub use tracker::{DependencyStateTracker, Effects, TickEffects, Transition};
