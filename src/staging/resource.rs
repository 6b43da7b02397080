// src/staging/resource.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::TransactionId;

/// What happens to a staging resource once its owner is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Dropped by the background sweep once the TTL elapses.
    AutoDrop,
    /// Left alone until an operator reclaims it explicitly.
    Manual,
    /// Archived first, then dropped, once the TTL elapses.
    ArchiveThenDrop,
    /// Data dropped but the resource record retained.
    KeepMetadata,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy::AutoDrop
    }
}

/// Lifecycle status of a staging resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingStatus {
    Provisioned,
    Ready,
    Failed,
    Archived,
    Dropped,
    /// Data dropped, record retained (`KeepMetadata` cleanup).
    MetadataOnly,
}

/// Requested shape of a staging resource.
///
/// `schema` is opaque column-definition text produced by the transaction
/// type's field-transformation rules (an external collaborator); it is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingSpec {
    pub schema: String,
    pub partition_strategy: Option<String>,
    pub cleanup_policy: CleanupPolicy,
    pub ttl_hours: u32,
}

/// Default TTL applied when a transaction type does not override it.
pub const DEFAULT_TTL_HOURS: u32 = 24;

impl Default for StagingSpec {
    fn default() -> Self {
        Self {
            schema: String::new(),
            partition_strategy: None,
            cleanup_policy: CleanupPolicy::AutoDrop,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }
}

/// Opaque reference handed to the owning transaction's worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StagingHandle {
    pub execution_id: Uuid,
    pub transaction_type: TransactionId,
    pub table_name: String,
}

/// One staging resource record.
///
/// Owned exclusively by the execution that created it; never shared across
/// executions, so no cross-execution locking is needed.
#[derive(Debug, Clone, Serialize)]
pub struct StagingResource {
    pub execution_id: Uuid,
    pub transaction_type: TransactionId,
    /// Globally unique; reserved atomically at provisioning time.
    pub table_name: String,
    pub schema_definition: String,
    pub partition_strategy: Option<String>,
    pub cleanup_policy: CleanupPolicy,
    pub ttl_hours: u32,
    pub created_at: DateTime<Utc>,
    pub dropped_at: Option<DateTime<Utc>>,
    pub row_count: u64,
    pub size_bytes: u64,
    pub status: StagingStatus,
}

impl StagingResource {
    pub fn handle(&self) -> StagingHandle {
        StagingHandle {
            execution_id: self.execution_id,
            transaction_type: self.transaction_type.clone(),
            table_name: self.table_name.clone(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(i64::from(self.ttl_hours))
    }

    /// Strictly past the TTL boundary at `now`.
    pub fn ttl_elapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped_at.is_some()
    }
}
