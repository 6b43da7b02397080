// src/audit/recorder.rs

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::record::{AuditEvent, AuditRecord, compute_hash};
use crate::errors::AuditError;

/// Result of walking a chain range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidation {
    pub valid: bool,
    /// Records successfully verified before validation stopped.
    pub checked: usize,
    /// Sequence of the first record that failed verification.
    pub first_invalid: Option<u64>,
    pub detail: Option<String>,
}

impl ChainValidation {
    fn ok(checked: usize) -> Self {
        Self {
            valid: true,
            checked,
            first_invalid: None,
            detail: None,
        }
    }
}

/// Append-only hash-chain recorder.
///
/// Appends are serialized by ownership: the execution runtime owns the
/// recorder and appends from its single event loop, so the `previous_hash`
/// pointer never sees concurrent writers. After a detected mismatch the
/// recorder is poisoned and refuses further appends until an operator
/// acknowledges the tampering — fail-closed, because the chain is the
/// regulatory record of truth.
#[derive(Debug, Default)]
pub struct AuditChainRecorder {
    records: Vec<AuditRecord>,
    previous_hash: Option<String>,
    poisoned: bool,
}

impl AuditChainRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate a recorder from an archived chain, e.g. records read back
    /// from storage. The chain is taken as-is; run [`validate_chain`] before
    /// trusting it.
    ///
    /// [`validate_chain`]: AuditChainRecorder::validate_chain
    pub fn from_records(records: Vec<AuditRecord>) -> Self {
        let previous_hash = records.last().map(|r| r.hash.clone());
        Self {
            records,
            previous_hash,
            poisoned: false,
        }
    }

    /// Append an event, extending the chain.
    pub fn append(
        &mut self,
        execution_id: Option<Uuid>,
        event: AuditEvent,
    ) -> Result<&AuditRecord, AuditError> {
        if self.poisoned {
            return Err(AuditError::Poisoned);
        }

        let sequence = self.records.len() as u64 + 1;
        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let hash = compute_hash(
            sequence,
            &id,
            &timestamp,
            execution_id.as_ref(),
            &event,
            self.previous_hash.as_deref(),
        );

        let record = AuditRecord {
            sequence,
            id,
            timestamp,
            execution_id,
            event,
            previous_hash: self.previous_hash.clone(),
            hash: hash.clone(),
        };

        self.previous_hash = Some(hash);
        self.records.push(record);
        Ok(self.records.last().expect("record just pushed"))
    }

    /// Validate the stored chain between two sequence numbers (inclusive).
    ///
    /// Walks in order, recomputing each hash from stored fields and checking
    /// linkage to the prior record. Stops at the first mismatch: everything
    /// after it is suspect but not individually diagnosed. A mismatch
    /// poisons the recorder.
    pub fn validate_chain(&mut self, from: u64, to: u64) -> ChainValidation {
        let slice: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|r| r.sequence >= from && r.sequence <= to)
            .cloned()
            .collect();

        let result = validate_records(&slice);
        if !result.valid {
            error!(
                first_invalid = ?result.first_invalid,
                detail = ?result.detail,
                "audit chain validation failed; recorder poisoned"
            );
            self.poisoned = true;
        }
        result
    }

    /// Operator acknowledgement after investigating a detected mismatch.
    pub fn acknowledge_tamper(&mut self) {
        info!("audit tamper acknowledged; recorder unpoisoned");
        self.poisoned = false;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Validate an ordered run of records independent of any recorder.
///
/// Each record's hash is recomputed from its stored fields; each record after
/// the first must link to its predecessor's stored hash.
pub fn validate_records(records: &[AuditRecord]) -> ChainValidation {
    for (i, record) in records.iter().enumerate() {
        let recomputed = record.compute_hash();
        if recomputed != record.hash {
            return ChainValidation {
                valid: false,
                checked: i,
                first_invalid: Some(record.sequence),
                detail: Some(format!(
                    "record {} hash mismatch: stored {} recomputed {}",
                    record.sequence, record.hash, recomputed
                )),
            };
        }

        if i > 0 {
            let expected = &records[i - 1].hash;
            if record.previous_hash.as_ref() != Some(expected) {
                return ChainValidation {
                    valid: false,
                    checked: i,
                    first_invalid: Some(record.sequence),
                    detail: Some(format!(
                        "record {} does not link to predecessor", record.sequence
                    )),
                };
            }
        }
    }

    ChainValidation::ok(records.len())
}
