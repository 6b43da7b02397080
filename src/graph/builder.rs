// src/graph/builder.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;
use crate::graph::{DEFAULT_PRIORITY_WEIGHT, TransactionId};

/// Classification of a dependency edge.
///
/// `ResourceLock` edges additionally carry a named mutual-exclusion token;
/// the planner serializes all transactions touching the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Sequential,
    Conditional,
    ParallelSafe,
    ResourceLock,
    DataConsistency,
}

/// Retry behaviour applied when a dependency wait times out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum RetryPolicy {
    /// No retries; the first timeout is final.
    None,
    /// Delay before retry N is `base_delay_ms * 2^N`, capped at `max_delay_ms`.
    ExponentialBackoff {
        base_delay_ms: u64,
        max_retries: u32,
        max_delay_ms: u64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::None
    }
}

impl RetryPolicy {
    /// Retry ceiling for this policy.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay in milliseconds before the given retry attempt (0-based).
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
                ..
            } => {
                let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
                base_delay_ms
                    .saturating_mul(factor)
                    .min(*max_delay_ms)
            }
        }
    }
}

/// One declared dependency: `target` must not run before `source` completes.
///
/// Identity within a job is the `(source, target)` pair; duplicates are
/// rejected at build time. Edges are immutable during a run and only mutated
/// through the configuration surface, which must write an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub source: TransactionId,
    pub target: TransactionId,
    pub kind: DependencyKind,
    /// Opaque predicate text for `Conditional` edges, evaluated by an
    /// external collaborator. Carried through untouched.
    pub condition: Option<String>,
    /// Tie-break weight, 1..=100. Higher dispatches first.
    pub priority_weight: u32,
    /// Upper bound on how long the target may wait on this edge.
    pub max_wait_seconds: u64,
    pub retry: RetryPolicy,
    /// Mutual-exclusion token; required when `kind` is `ResourceLock`.
    pub lock_token: Option<String>,
}

impl DependencyEdge {
    /// Convenience constructor for a plain sequential edge with defaults.
    pub fn sequential(source: impl Into<TransactionId>, target: impl Into<TransactionId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind: DependencyKind::Sequential,
            condition: None,
            priority_weight: DEFAULT_PRIORITY_WEIGHT,
            max_wait_seconds: 300,
            retry: RetryPolicy::None,
            lock_token: None,
        }
    }

    /// Edge identity within a job definition.
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.target)
    }
}

/// Adjacency links for one transaction type.
#[derive(Debug, Clone, Default)]
struct NodeLinks {
    /// Transactions that must wait for this one (outgoing edges).
    successors: Vec<TransactionId>,
    /// Transactions this one waits for (incoming edges).
    predecessors: Vec<TransactionId>,
}

/// In-memory dependency graph for one job, keyed by transaction id.
///
/// Built once per job activation; a pure function of the declared transaction
/// set and edge list. Node iteration order is lexicographic (`BTreeMap`), so
/// every traversal over this structure is deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<TransactionId, NodeLinks>,
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    /// Build the adjacency structure, rejecting malformed input.
    ///
    /// Rejections (`ConfigurationError`):
    /// - empty transaction set
    /// - a self-loop edge
    /// - a duplicate `(source, target)` pair
    /// - an edge endpoint not in the declared transaction set
    /// - `priority_weight` outside 1..=100
    /// - a `ResourceLock` edge without a `lock_token`
    pub fn build(
        transactions: &BTreeSet<TransactionId>,
        edges: Vec<DependencyEdge>,
    ) -> Result<Self, ConfigurationError> {
        if transactions.is_empty() {
            return Err(ConfigurationError::EmptyJob);
        }

        let mut nodes: BTreeMap<TransactionId, NodeLinks> = transactions
            .iter()
            .map(|id| (id.clone(), NodeLinks::default()))
            .collect();

        let mut seen: BTreeSet<(TransactionId, TransactionId)> = BTreeSet::new();

        for edge in &edges {
            if edge.source == edge.target {
                return Err(ConfigurationError::SelfLoop(edge.source.clone()));
            }
            if !seen.insert((edge.source.clone(), edge.target.clone())) {
                return Err(ConfigurationError::DuplicateEdge {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
            for endpoint in [&edge.source, &edge.target] {
                if !nodes.contains_key(endpoint) {
                    return Err(ConfigurationError::UnknownTransaction(endpoint.clone()));
                }
            }
            if !(1..=100).contains(&edge.priority_weight) {
                return Err(ConfigurationError::PriorityWeightOutOfRange {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                    weight: edge.priority_weight,
                });
            }
            if edge.kind == DependencyKind::ResourceLock && edge.lock_token.is_none() {
                return Err(ConfigurationError::MissingLockToken {
                    from: edge.source.clone(),
                    to: edge.target.clone(),
                });
            }
        }

        for edge in &edges {
            if let Some(links) = nodes.get_mut(&edge.source) {
                links.successors.push(edge.target.clone());
            }
            if let Some(links) = nodes.get_mut(&edge.target) {
                links.predecessors.push(edge.source.clone());
            }
        }

        // Keep neighbour lists sorted so traversal order never depends on
        // declaration order.
        for links in nodes.values_mut() {
            links.successors.sort();
            links.predecessors.sort();
        }

        Ok(Self { nodes, edges })
    }

    /// All transaction ids, lexicographically ordered.
    pub fn transactions(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Direct successors (transactions that wait on `id`), sorted.
    pub fn successors_of(&self, id: &str) -> &[TransactionId] {
        self.nodes
            .get(id)
            .map(|n| n.successors.as_slice())
            .unwrap_or(&[])
    }

    /// Direct predecessors (transactions `id` waits on), sorted.
    pub fn predecessors_of(&self, id: &str) -> &[TransactionId] {
        self.nodes
            .get(id)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.predecessors_of(id).len()
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.successors_of(id).len()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Look up the declared edge between two transactions, if any.
    pub fn edge(&self, source: &str, target: &str) -> Option<&DependencyEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }

    /// Effective dispatch priority of a transaction: the maximum
    /// `priority_weight` over its incident edges, or the default weight for
    /// isolated transactions.
    pub fn priority_of(&self, id: &str) -> u32 {
        self.edges
            .iter()
            .filter(|e| e.source == id || e.target == id)
            .map(|e| e.priority_weight)
            .max()
            .unwrap_or(DEFAULT_PRIORITY_WEIGHT)
    }
}
