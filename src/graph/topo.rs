// src/graph/topo.rs

//! Wave planning over a validated acyclic graph.
//!
//! Kahn's algorithm: repeatedly remove the zero-in-degree frontier,
//! decrementing successor in-degrees. Every frontier becomes one or more
//! "waves" of transactions eligible for concurrent dispatch; a frontier
//! larger than the worker-pool capacity is split into successive waves in
//! priority order. Ordering within a frontier is deterministic: higher
//! `priority_weight` first, then lexicographically smaller id.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::graph::builder::{DependencyGraph, DependencyKind};
use crate::graph::TransactionId;

/// Deterministic schedule for one job, computed at activation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub job_id: String,
    /// Transactions grouped by dispatch wave; everything in one wave may run
    /// concurrently, subject to resource locks.
    pub waves: Vec<Vec<TransactionId>>,
    /// Flattened topological order; a transaction's rank is its index here.
    pub order: Vec<TransactionId>,
    /// Kahn iteration (distance from a root) per transaction. Waves split by
    /// capacity share a level.
    pub levels: BTreeMap<TransactionId, usize>,
    /// Mutual-exclusion tokens from `ResourceLock` edges, mapped to every
    /// transaction that must serialize on them.
    pub resource_locks: BTreeMap<String, Vec<TransactionId>>,
    /// Worker-pool capacity the waves were sized against.
    pub parallel_threads: usize,
}

impl ExecutionPlan {
    /// Wave index of a transaction, if it is part of the plan.
    pub fn wave_of(&self, id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|t| t == id))
    }

    /// Topological rank of a transaction.
    pub fn rank_of(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|t| t == id)
    }
}

/// Compute the wave plan. The graph must already be validated acyclic; this
/// is enforced by activation, which runs cycle detection first.
pub fn plan_waves(job_id: &str, graph: &DependencyGraph, capacity: usize) -> ExecutionPlan {
    let capacity = capacity.max(1);

    let mut in_degree: BTreeMap<&str, usize> = graph
        .transactions()
        .map(|id| (id, graph.in_degree(id)))
        .collect();

    let mut frontier: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    sort_by_dispatch_order(&mut frontier, graph);

    let mut waves: Vec<Vec<TransactionId>> = Vec::new();
    let mut levels: BTreeMap<TransactionId, usize> = BTreeMap::new();
    let mut level = 0usize;

    while !frontier.is_empty() {
        for id in &frontier {
            levels.insert((*id).to_string(), level);
        }
        for chunk in frontier.chunks(capacity) {
            waves.push(chunk.iter().map(|id| id.to_string()).collect());
        }

        // In-degree updates happen only after the whole frontier is emitted:
        // a successor never shares a wave with its predecessor.
        let mut next: Vec<&str> = Vec::new();
        for id in &frontier {
            for succ in graph.successors_of(id) {
                let deg = in_degree
                    .get_mut(succ.as_str())
                    .expect("successor of a known node is a known node");
                *deg -= 1;
                if *deg == 0 {
                    next.push(succ.as_str());
                }
            }
        }
        sort_by_dispatch_order(&mut next, graph);
        frontier = next;
        level += 1;
    }

    let order: Vec<TransactionId> = waves.iter().flatten().cloned().collect();
    let resource_locks = collect_resource_locks(graph);

    debug!(
        job = %job_id,
        waves = waves.len(),
        transactions = order.len(),
        locks = resource_locks.len(),
        "computed execution plan"
    );

    ExecutionPlan {
        job_id: job_id.to_string(),
        waves,
        order,
        levels,
        resource_locks,
        parallel_threads: capacity,
    }
}

/// (priority_weight desc, id asc) — the deterministic tie-break.
fn sort_by_dispatch_order(ids: &mut [&str], graph: &DependencyGraph) {
    ids.sort_by(|a, b| {
        match graph.priority_of(b).cmp(&graph.priority_of(a)) {
            Ordering::Equal => a.cmp(b),
            other => other,
        }
    });
}

/// Register both endpoints of every `ResourceLock` edge under its token.
fn collect_resource_locks(graph: &DependencyGraph) -> BTreeMap<String, Vec<TransactionId>> {
    let mut locks: BTreeMap<String, Vec<TransactionId>> = BTreeMap::new();

    for edge in graph.edges() {
        if edge.kind != DependencyKind::ResourceLock {
            continue;
        }
        // Presence of the token is validated at graph build time.
        let Some(token) = edge.lock_token.as_deref() else {
            continue;
        };
        let entry = locks.entry(token.to_string()).or_default();
        for id in [&edge.source, &edge.target] {
            if !entry.contains(id) {
                entry.push(id.clone());
            }
        }
    }

    for participants in locks.values_mut() {
        participants.sort_by(|a, b| match graph.priority_of(b).cmp(&graph.priority_of(a)) {
            Ordering::Equal => a.cmp(b),
            other => other,
        });
    }

    locks
}
