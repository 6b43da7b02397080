//! Builders for job definitions and dependency declarations used across the
//! integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use batchdag::config::{DependencyDecl, JobDefinition, JobSection, TransactionConfig};
use batchdag::graph::{DEFAULT_PRIORITY_WEIGHT, DependencyKind, RetryPolicy, TransactionId};

pub struct JobDefinitionBuilder {
    id: String,
    parallel_threads: usize,
    staging_ttl_hours: u32,
    sweep_interval_seconds: u64,
    transaction: BTreeMap<TransactionId, TransactionConfig>,
    dependency: Vec<DependencyDecl>,
}

impl JobDefinitionBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            parallel_threads: 4,
            staging_ttl_hours: 24,
            sweep_interval_seconds: 300,
            transaction: BTreeMap::new(),
            dependency: Vec::new(),
        }
    }

    pub fn parallel_threads(mut self, n: usize) -> Self {
        self.parallel_threads = n;
        self
    }

    pub fn staging_ttl_hours(mut self, hours: u32) -> Self {
        self.staging_ttl_hours = hours;
        self
    }

    pub fn with_transaction(mut self, id: &str) -> Self {
        self.transaction
            .insert(id.to_string(), TransactionConfig::default());
        self
    }

    pub fn with_transaction_config(mut self, id: &str, cfg: TransactionConfig) -> Self {
        self.transaction.insert(id.to_string(), cfg);
        self
    }

    pub fn with_dependency(mut self, decl: DependencyDecl) -> Self {
        self.dependency.push(decl);
        self
    }

    /// Shorthand for a plain sequential dependency with defaults.
    pub fn dep(self, source: &str, target: &str) -> Self {
        let decl = DependencyDeclBuilder::new(source, target).build();
        self.with_dependency(decl)
    }

    pub fn build(self) -> JobDefinition {
        JobDefinition {
            job: JobSection {
                id: self.id,
                parallel_threads: self.parallel_threads,
                staging_ttl_hours: self.staging_ttl_hours,
                sweep_interval_seconds: self.sweep_interval_seconds,
            },
            transaction: self.transaction,
            dependency: self.dependency,
        }
    }
}

pub struct DependencyDeclBuilder {
    source: String,
    target: String,
    kind: DependencyKind,
    condition: Option<String>,
    priority_weight: u32,
    max_wait_seconds: u64,
    retry: RetryPolicy,
    lock_token: Option<String>,
}

impl DependencyDeclBuilder {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind: DependencyKind::Sequential,
            condition: None,
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
            max_wait_seconds: 300,
            retry: RetryPolicy::None,
            lock_token: None,
        }
    }

    pub fn kind(mut self, kind: DependencyKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn priority_weight(mut self, weight: u32) -> Self {
        self.priority_weight = weight;
        self
    }

    pub fn max_wait_seconds(mut self, seconds: u64) -> Self {
        self.max_wait_seconds = seconds;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn lock_token(mut self, token: &str) -> Self {
        self.kind = DependencyKind::ResourceLock;
        self.lock_token = Some(token.to_string());
        self
    }

    pub fn build(self) -> DependencyDecl {
        DependencyDecl {
            source: self.source,
            target: self.target,
            kind: self.kind,
            condition: self.condition,
            priority_weight: self.priority_weight,
            max_wait_seconds: self.max_wait_seconds,
            retry: self.retry,
            lock_token: self.lock_token,
        }
    }
}
