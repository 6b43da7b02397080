// src/state/tracker.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::graph::{DependencyGraph, ExecutionPlan, TransactionId};
use crate::state::machine::{DependencyState, DependencyStatus, TickEvent, TransactionState};
use crate::state::node::{NodeArena, NodeColor};

/// One observable state change, reported for auditing and live dashboards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transition {
    Dependency {
        source: TransactionId,
        target: TransactionId,
        from: DependencyStatus,
        to: DependencyStatus,
        retry_count: u32,
    },
    Transaction {
        id: TransactionId,
        state: TransactionState,
    },
}

/// Effects of applying a transaction outcome.
#[derive(Debug, Default)]
pub struct Effects {
    pub transitions: Vec<Transition>,
    /// Transactions whose unresolved-predecessor count reached zero.
    pub newly_eligible: Vec<TransactionId>,
    /// Transactions cancelled by cascade, in cascade order.
    pub cancelled: Vec<TransactionId>,
}

/// Effects of a timeout-evaluation tick.
#[derive(Debug, Default)]
pub struct TickEffects {
    pub transitions: Vec<Transition>,
    pub newly_eligible: Vec<TransactionId>,
    pub cancelled: Vec<TransactionId>,
    /// Edges whose retry budget ran out on this tick.
    pub failed_edges: Vec<(TransactionId, TransactionId)>,
}

/// Per-execution state machine driver.
///
/// Owns the node arena and one [`DependencyState`] per declared edge. All
/// mutation goes through outcome reports and `tick`; every state change is
/// returned as a [`Transition`] so the runtime can audit it. The tracker is
/// deliberately clock-free: callers pass `now`, which keeps timeout behaviour
/// deterministic under test.
pub struct DependencyStateTracker {
    graph: DependencyGraph,
    nodes: NodeArena,
    edges: BTreeMap<(TransactionId, TransactionId), DependencyState>,
}

impl DependencyStateTracker {
    pub fn new(graph: DependencyGraph, plan: &ExecutionPlan, now: DateTime<Utc>) -> Self {
        let nodes = NodeArena::from_plan(&graph, plan);
        let edges = graph
            .edges()
            .iter()
            .map(|e| {
                (
                    (e.source.clone(), e.target.clone()),
                    DependencyState::new(e, now),
                )
            })
            .collect();

        Self {
            graph,
            nodes,
            edges,
        }
    }

    /// Transactions dispatchable right now: never dispatched, all
    /// predecessors resolved.
    pub fn eligible(&self) -> Vec<TransactionId> {
        self.nodes
            .iter()
            .filter(|n| n.color == NodeColor::White && n.unresolved_predecessors == 0)
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn is_eligible(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.color == NodeColor::White && n.unresolved_predecessors == 0)
            .unwrap_or(false)
    }

    pub fn node(&self, id: &str) -> Option<&crate::state::node::ExecutionGraphNode> {
        self.nodes.get(id)
    }

    pub fn edge_state(&self, source: &str, target: &str) -> Option<&DependencyState> {
        self.edges
            .get(&(source.to_string(), target.to_string()))
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.all_terminal()
    }

    /// Mark a transaction as dispatched to a worker slot.
    pub fn transaction_started(
        &mut self,
        id: &str,
        worker: usize,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();

        match self.nodes.get_mut(id) {
            Some(node) => {
                node.color = NodeColor::Gray;
                node.thread_assignment = Some(worker);
                node.started_at = Some(now);
            }
            None => {
                warn!(transaction = %id, "start reported for unknown transaction");
                return transitions;
            }
        }
        transitions.push(Transition::Transaction {
            id: id.to_string(),
            state: TransactionState::Running,
        });

        for (key, state) in self.edges.iter_mut() {
            if key.0 == id {
                let from = state.status;
                if state.source_running() {
                    transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from,
                        to: state.status,
                        retry_count: state.retry_count,
                    });
                }
            } else if key.1 == id {
                state.target_running();
            }
        }

        transitions
    }

    /// Apply a successful completion: satisfy outgoing edges, decrement
    /// dependents' unresolved-predecessor counts, and report any transaction
    /// that became eligible.
    pub fn transaction_completed(&mut self, id: &str, now: DateTime<Utc>) -> Effects {
        let mut effects = Effects::default();

        match self.nodes.get_mut(id) {
            Some(node) => {
                node.color = NodeColor::Black;
                node.finished_at = Some(now);
            }
            None => {
                warn!(transaction = %id, "completion reported for unknown transaction");
                return effects;
            }
        }
        effects.transitions.push(Transition::Transaction {
            id: id.to_string(),
            state: TransactionState::Completed,
        });

        let successors: Vec<TransactionId> =
            self.graph.successors_of(id).to_vec();

        for succ in &successors {
            let key = (id.to_string(), succ.clone());
            let Some(state) = self.edges.get_mut(&key) else {
                continue;
            };
            let from = state.status;
            if state.source_completed() {
                effects.transitions.push(Transition::Dependency {
                    source: key.0.clone(),
                    target: key.1.clone(),
                    from,
                    to: state.status,
                    retry_count: state.retry_count,
                });
                self.resolve_edge_for(succ, id, &mut effects.newly_eligible);
            }
        }

        for (key, state) in self.edges.iter_mut() {
            if key.1 == id {
                state.target_completed();
            }
        }

        effects
    }

    /// Apply a definitive failure: fail outgoing edges and cascade
    /// cancellation to every transaction depending on this one, directly or
    /// transitively.
    pub fn transaction_failed(&mut self, id: &str, now: DateTime<Utc>) -> Effects {
        let mut effects = Effects::default();

        match self.nodes.get_mut(id) {
            Some(node) => {
                node.color = NodeColor::Error;
                node.finished_at = Some(now);
            }
            None => {
                warn!(transaction = %id, "failure reported for unknown transaction");
                return effects;
            }
        }
        effects.transitions.push(Transition::Transaction {
            id: id.to_string(),
            state: TransactionState::Failed,
        });

        let successors: Vec<TransactionId> =
            self.graph.successors_of(id).to_vec();

        for succ in &successors {
            let key = (id.to_string(), succ.clone());
            if let Some(state) = self.edges.get_mut(&key) {
                let from = state.status;
                if state.source_failed() {
                    effects.transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from,
                        to: state.status,
                        retry_count: state.retry_count,
                    });
                }
            }
        }

        for succ in successors {
            self.cascade_cancel(&succ, &mut effects);
        }

        effects
    }

    /// Evaluate timeouts and due retries against `now`.
    ///
    /// Retry exhaustion fails the edge and cancels its target transaction
    /// (plus everything downstream), matching the failure cascade.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickEffects {
        let mut effects = TickEffects::default();

        let keys: Vec<(TransactionId, TransactionId)> = self.edges.keys().cloned().collect();

        for key in keys {
            // Edges whose target is already terminal have nothing to time out.
            let target_terminal = self
                .nodes
                .get(&key.1)
                .map(|n| n.color.is_terminal())
                .unwrap_or(true);
            if target_terminal {
                continue;
            }

            let Some(state) = self.edges.get_mut(&key) else {
                continue;
            };
            let from = state.status;
            let event = state.tick(now);
            let to = state.status;
            let retry_count = state.retry_count;

            match event {
                TickEvent::Unchanged => {}
                TickEvent::TimedOutWillRetry { retry_at_ms } => {
                    debug!(
                        source = %key.0,
                        target = %key.1,
                        retry_in_ms = retry_at_ms,
                        "dependency wait timed out; retry scheduled"
                    );
                    effects.transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from,
                        to,
                        retry_count,
                    });
                }
                TickEvent::RetryStarted => {
                    effects.transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from,
                        to,
                        retry_count,
                    });
                    if to == DependencyStatus::Satisfied {
                        let (source, target) = (key.0.clone(), key.1.clone());
                        self.resolve_edge_for(&target, &source, &mut effects.newly_eligible);
                    }
                }
                TickEvent::TimedOutExhausted => {
                    // PENDING/BLOCKED -> TIMEOUT -> FAILED, in two recorded steps.
                    effects.transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from,
                        to,
                        retry_count,
                    });
                    if let Some(state) = self.edges.get_mut(&key) {
                        state.source_failed();
                    }
                    effects.transitions.push(Transition::Dependency {
                        source: key.0.clone(),
                        target: key.1.clone(),
                        from: DependencyStatus::Timeout,
                        to: DependencyStatus::Failed,
                        retry_count,
                    });
                    effects.failed_edges.push(key.clone());

                    let target = key.1.clone();
                    let mut cascade = Effects::default();
                    self.cascade_cancel(&target, &mut cascade);
                    effects.transitions.extend(cascade.transitions);
                    effects.cancelled.extend(cascade.cancelled);
                }
            }
        }

        effects
    }

    /// Cancel every not-yet-terminal transaction in the subgraph rooted at
    /// `root`, including `root` itself.
    pub fn cascade_cancel(&mut self, root: &str, effects: &mut Effects) {
        let mut stack: Vec<TransactionId> = vec![root.to_string()];

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.color.is_terminal() {
                continue;
            }
            node.color = NodeColor::Blocked;
            effects.transitions.push(Transition::Transaction {
                id: id.clone(),
                state: TransactionState::Cancelled,
            });
            effects.cancelled.push(id.clone());

            for (key, state) in self.edges.iter_mut() {
                if key.0 == id && !state.status.is_terminal() {
                    let from = state.status;
                    if state.cancel() {
                        effects.transitions.push(Transition::Dependency {
                            source: key.0.clone(),
                            target: key.1.clone(),
                            from,
                            to: state.status,
                            retry_count: state.retry_count,
                        });
                    }
                }
            }

            stack.extend(self.graph.successors_of(&id).iter().cloned());
        }
    }

    /// A satisfied edge resolves one predecessor of `target`; reaching zero
    /// makes `target` eligible for dispatch.
    fn resolve_edge_for(
        &mut self,
        target: &str,
        source: &str,
        newly_eligible: &mut Vec<TransactionId>,
    ) {
        if let Some(node) = self.nodes.get_mut(source) {
            node.unresolved_successors = node.unresolved_successors.saturating_sub(1);
        }
        if let Some(node) = self.nodes.get_mut(target) {
            node.unresolved_predecessors = node.unresolved_predecessors.saturating_sub(1);
            if node.unresolved_predecessors == 0 && node.color == NodeColor::White {
                newly_eligible.push(target.to_string());
            }
        }
    }
}
