// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::graph::{DEFAULT_PRIORITY_WEIGHT, DependencyEdge, DependencyKind, RetryPolicy, TransactionId};
use crate::staging::{CleanupPolicy, StagingSpec};

/// Top-level job definition as read from a TOML file.
///
/// ```toml
/// [job]
/// id = "nightly-core-load"
/// parallel_threads = 4
///
/// [transaction.accounts]
/// chunk_size = 5000
/// timeout_seconds = 300
/// staging_schema = "account_id NUMBER(18), branch_code CHAR(4)"
///
/// [transaction.postings]
/// chunk_size = 20000
///
/// [[dependency]]
/// source = "accounts"
/// target = "postings"
/// kind = "sequential"
/// priority_weight = 60
/// max_wait_seconds = 120
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct JobDefinition {
    pub job: JobSection,

    /// All transaction types from `[transaction.<id>]`, keyed by id.
    #[serde(default)]
    pub transaction: BTreeMap<TransactionId, TransactionConfig>,

    /// Dependency declarations from `[[dependency]]`.
    #[serde(default)]
    pub dependency: Vec<DependencyDecl>,
}

impl JobDefinition {
    /// Declared transaction-type set, for graph construction.
    pub fn transaction_ids(&self) -> BTreeSet<TransactionId> {
        self.transaction.keys().cloned().collect()
    }

    /// Map the declared dependencies onto graph edges.
    pub fn dependency_edges(&self) -> Vec<DependencyEdge> {
        self.dependency.iter().map(DependencyDecl::to_edge).collect()
    }

    /// Staging shape for one transaction type, with job-level defaults
    /// filled in.
    pub fn staging_spec(&self, transaction_id: &str) -> StagingSpec {
        let Some(tx) = self.transaction.get(transaction_id) else {
            return StagingSpec {
                ttl_hours: self.job.staging_ttl_hours,
                ..StagingSpec::default()
            };
        };
        StagingSpec {
            schema: tx.staging_schema.clone().unwrap_or_default(),
            partition_strategy: tx.partition_strategy.clone(),
            cleanup_policy: tx.cleanup_policy.unwrap_or_default(),
            ttl_hours: tx.ttl_hours.unwrap_or(self.job.staging_ttl_hours),
        }
    }
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    pub id: String,

    /// Worker-pool capacity; also caps wave width.
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Default TTL for staging resources that do not override it.
    #[serde(default = "default_staging_ttl_hours")]
    pub staging_ttl_hours: u32,

    /// Background sweep cadence.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_parallel_threads() -> usize {
    4
}

fn default_staging_ttl_hours() -> u32 {
    24
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

/// `[transaction.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    /// Bulk-load chunk size handed through to the processor.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Processing timeout handed through to the processor.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Opaque column-definition text for the staging resource, produced by
    /// the field-transformation rules of this transaction type.
    #[serde(default)]
    pub staging_schema: Option<String>,

    #[serde(default)]
    pub partition_strategy: Option<String>,

    #[serde(default)]
    pub cleanup_policy: Option<CleanupPolicy>,

    /// TTL override; falls back to `job.staging_ttl_hours`.
    #[serde(default)]
    pub ttl_hours: Option<u32>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            timeout_seconds: default_timeout_seconds(),
            staging_schema: None,
            partition_strategy: None,
            cleanup_policy: None,
            ttl_hours: None,
        }
    }
}

fn default_chunk_size() -> u32 {
    1000
}

fn default_timeout_seconds() -> u64 {
    600
}

/// `[[dependency]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DependencyDecl {
    pub source: TransactionId,
    pub target: TransactionId,

    #[serde(default = "default_kind")]
    pub kind: DependencyKind,

    /// Opaque predicate for `conditional` edges; evaluated externally.
    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default = "default_priority_weight")]
    pub priority_weight: u32,

    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Required when `kind = "resource_lock"`.
    #[serde(default)]
    pub lock_token: Option<String>,
}

fn default_kind() -> DependencyKind {
    DependencyKind::Sequential
}

fn default_priority_weight() -> u32 {
    DEFAULT_PRIORITY_WEIGHT
}

fn default_max_wait_seconds() -> u64 {
    300
}

impl DependencyDecl {
    pub fn to_edge(&self) -> DependencyEdge {
        DependencyEdge {
            source: self.source.clone(),
            target: self.target.clone(),
            kind: self.kind,
            condition: self.condition.clone(),
            priority_weight: self.priority_weight,
            max_wait_seconds: self.max_wait_seconds,
            retry: self.retry.clone(),
            lock_token: self.lock_token.clone(),
        }
    }
}
