// src/state/node.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::graph::{DependencyGraph, ExecutionPlan, TransactionId};

/// Runtime colour of an execution graph node.
///
/// `White`/`Gray`/`Black` follow the DFS convention: not yet dispatched,
/// in flight, completed. `Blocked` marks a node cancelled before or during
/// dispatch; `Error` marks a node whose own processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeColor {
    White,
    Gray,
    Black,
    Blocked,
    Error,
}

impl NodeColor {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeColor::Black | NodeColor::Blocked | NodeColor::Error)
    }
}

/// One node per `(execution, transaction)` pair, created when the execution
/// starts and torn down with it.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionGraphNode {
    pub id: TransactionId,
    pub color: NodeColor,
    /// Distance from a root (Kahn iteration index).
    pub level: usize,
    /// Final rank in the flattened topological order.
    pub topological_order: usize,
    /// Predecessors not yet resolved; reaching zero makes the node eligible.
    pub unresolved_predecessors: usize,
    /// Successors not yet resolved, for observability.
    pub unresolved_successors: usize,
    /// Worker slot the node was dispatched on.
    pub thread_assignment: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// In-memory arena of nodes for the active execution, indexed by transaction
/// id. Replaces any relational representation on the hot scheduling path;
/// only snapshots would ever be persisted.
#[derive(Debug, Clone)]
pub struct NodeArena {
    nodes: BTreeMap<TransactionId, ExecutionGraphNode>,
}

impl NodeArena {
    pub fn from_plan(graph: &DependencyGraph, plan: &ExecutionPlan) -> Self {
        let nodes = graph
            .transactions()
            .map(|id| {
                let node = ExecutionGraphNode {
                    id: id.to_string(),
                    color: NodeColor::White,
                    level: plan.levels.get(id).copied().unwrap_or(0),
                    topological_order: plan.rank_of(id).unwrap_or(0),
                    unresolved_predecessors: graph.in_degree(id),
                    unresolved_successors: graph.out_degree(id),
                    thread_assignment: None,
                    started_at: None,
                    finished_at: None,
                };
                (id.to_string(), node)
            })
            .collect();

        Self { nodes }
    }

    pub fn get(&self, id: &str) -> Option<&ExecutionGraphNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ExecutionGraphNode> {
        self.nodes.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionGraphNode> {
        self.nodes.values()
    }

    /// True once every node has reached a terminal colour.
    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|n| n.color.is_terminal())
    }
}
