// src/errors.rs

//! Crate-wide error types.
//!
//! Activation failures (malformed dependency sets, cycles) and audit-chain
//! integrity failures are typed so callers can match on them; fallible
//! plumbing (file IO, TOML parsing) uses `anyhow` with context instead.

use thiserror::Error;

use crate::graph::TransactionId;

/// Rejection reasons for a job definition, raised before any execution starts.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The dependency set itself is malformed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The dependency graph contains a cycle. Fail-closed: no partial plan is
    /// produced.
    #[error("cycle detected in dependency graph: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<TransactionId> },
}

/// Structural problems in a declared dependency set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("transaction '{0}' declares a dependency on itself")]
    SelfLoop(TransactionId),

    // Endpoint fields are named `from`/`to` rather than `source`/`target`:
    // thiserror treats a field named `source` as the error's cause and
    // requires it to implement `std::error::Error`.
    #[error("duplicate dependency declared from '{from}' to '{to}'")]
    DuplicateEdge {
        from: TransactionId,
        to: TransactionId,
    },

    #[error("dependency references undeclared transaction '{0}'")]
    UnknownTransaction(TransactionId),

    #[error("priority_weight {weight} on dependency '{from}' -> '{to}' is outside 1..=100")]
    PriorityWeightOutOfRange {
        from: TransactionId,
        to: TransactionId,
        weight: u32,
    },

    #[error("resource_lock dependency '{from}' -> '{to}' has no lock_token")]
    MissingLockToken {
        from: TransactionId,
        to: TransactionId,
    },

    #[error("job declares no transaction types")]
    EmptyJob,
}

/// Integrity failures in the audit hash chain.
///
/// These are the one error class that is escalated rather than retried: the
/// chain is the regulatory record of truth, so a mismatch halts further
/// audit-dependent activity until an operator steps in.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditError {
    // Mismatch details travel in `ChainValidation`; the error surface only
    // carries the fail-closed state.
    #[error("audit recorder is poisoned by a detected chain mismatch; appends refused")]
    Poisoned,
}

/// Staging resource lifecycle failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StagingError {
    #[error("staging resource already provisioned for transaction '{0}' in this execution")]
    AlreadyProvisioned(TransactionId),

    #[error("no staging resource found for transaction '{0}' in this execution")]
    NotFound(TransactionId),

    #[error("staging resource '{0}' has already been dropped")]
    AlreadyDropped(String),
}

pub use anyhow::{Error, Result};
