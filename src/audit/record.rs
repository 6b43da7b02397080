// src/audit/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::graph::TransactionId;

/// Everything the chain records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditEvent {
    JobActivated {
        job_id: String,
        transaction_count: usize,
        edge_count: usize,
    },
    PlanComputed {
        job_id: String,
        wave_count: usize,
    },
    ExecutionStarted {
        job_id: String,
    },
    TransactionDispatched {
        transaction: TransactionId,
        wave: usize,
        worker: usize,
    },
    TransactionCompleted {
        transaction: TransactionId,
    },
    TransactionFailed {
        transaction: TransactionId,
        reason: String,
    },
    TransactionCancelled {
        transaction: TransactionId,
    },
    DependencyTransition {
        source: TransactionId,
        target: TransactionId,
        from: String,
        to: String,
        retry_count: u32,
    },
    StagingProvisioned {
        transaction: TransactionId,
        table_name: String,
    },
    StagingReclaimed {
        table_name: String,
    },
    LockAcquired {
        token: String,
        transaction: TransactionId,
    },
    LockReleased {
        token: String,
        transaction: TransactionId,
    },
    ExecutionFinished {
        job_id: String,
        success: bool,
    },
    /// Dependency definitions may only change through the configuration
    /// surface, and such changes must land in the chain.
    ConfigMutated {
        detail: String,
    },
}

/// One link in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub execution_id: Option<Uuid>,
    pub event: AuditEvent,
    /// Hash of the immediately preceding record; `None` only for the first.
    pub previous_hash: Option<String>,
    /// SHA-256 over this record's canonical fields and `previous_hash`.
    pub hash: String,
}

impl AuditRecord {
    /// Recompute the hash from the record's stored fields.
    ///
    /// The chain invariant: this must reproduce `self.hash` using the stored
    /// `previous_hash`; anything else signals tampering of this record or an
    /// ancestor.
    pub fn compute_hash(&self) -> String {
        compute_hash(
            self.sequence,
            &self.id,
            &self.timestamp,
            self.execution_id.as_ref(),
            &self.event,
            self.previous_hash.as_deref(),
        )
    }
}

/// Canonical hash input: fixed field order, RFC 3339 timestamps, JSON for the
/// event body, previous hash appended last.
pub(crate) fn compute_hash(
    sequence: u64,
    id: &Uuid,
    timestamp: &DateTime<Utc>,
    execution_id: Option<&Uuid>,
    event: &AuditEvent,
    previous_hash: Option<&str>,
) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        sequence,
        id,
        timestamp.to_rfc3339(),
        execution_id.map(Uuid::to_string).unwrap_or_default(),
        serde_json::to_string(event).unwrap_or_default(),
        previous_hash.unwrap_or(""),
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
