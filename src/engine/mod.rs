// src/engine/mod.rs

//! Execution engine: worker pool, resource-lock table, and the event-loop
//! runtime that owns all mutable execution state.

pub mod locks;
pub mod runtime;
pub mod worker;

pub use locks::LockTable;
pub use runtime::{ExecutionReport, ExecutionRuntime, RuntimeEvent, StateChangeEvent};
pub use worker::{
    Dispatch, SimulationProcessor, TransactionContext, TransactionOutcome, TransactionProcessor,
    spawn_workers,
};
