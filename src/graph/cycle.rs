// src/graph/cycle.rs

//! Three-color depth-first cycle detection.
//!
//! WHITE = unvisited, GRAY = on the current DFS stack, BLACK = fully
//! processed. A back edge into a GRAY node signals a cycle; the minimal cycle
//! path is reconstructed by walking the DFS parent chain from the back-edge
//! source up to the back-edge target.
//!
//! Runs once per job activation. Node visitation follows lexicographic id
//! order, so the same input always reports the same cycle.

use std::collections::HashMap;

use tracing::debug;

use crate::graph::builder::DependencyGraph;
use crate::graph::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Search the graph for a cycle.
///
/// Returns `None` for an acyclic graph, or the cycle path `[t0, t1, .., tn]`
/// where each `ti` depends-precedes `ti+1` and `tn` closes back to `t0`.
pub fn find_cycle(graph: &DependencyGraph) -> Option<Vec<TransactionId>> {
    let mut colors: HashMap<&str, Color> = graph
        .transactions()
        .map(|id| (id, Color::White))
        .collect();
    let mut parents: HashMap<&str, &str> = HashMap::new();

    for root in graph.transactions() {
        if colors[root] != Color::White {
            continue;
        }
        if let Some((from, to)) = visit(root, graph, &mut colors, &mut parents) {
            let path = reconstruct_path(from, to, &parents);
            debug!(cycle = ?path, "back edge found during DFS");
            return Some(path);
        }
    }

    None
}

/// DFS from `node`. Returns the back edge `(from, to)` if one is found.
fn visit<'g>(
    node: &'g str,
    graph: &'g DependencyGraph,
    colors: &mut HashMap<&'g str, Color>,
    parents: &mut HashMap<&'g str, &'g str>,
) -> Option<(&'g str, &'g str)> {
    colors.insert(node, Color::Gray);

    for succ in graph.successors_of(node) {
        match colors[succ.as_str()] {
            Color::Gray => return Some((node, succ.as_str())),
            Color::White => {
                parents.insert(succ.as_str(), node);
                if let Some(found) = visit(succ.as_str(), graph, colors, parents) {
                    return Some(found);
                }
            }
            Color::Black => {}
        }
    }

    colors.insert(node, Color::Black);
    None
}

/// Walk the parent chain from the back-edge source `from` up to the back-edge
/// target `to`, then flip it so the path reads in dependency order starting
/// at `to`.
fn reconstruct_path(
    from: &str,
    to: &str,
    parents: &HashMap<&str, &str>,
) -> Vec<TransactionId> {
    let mut path = vec![from.to_string()];
    let mut cursor = from;
    while cursor != to {
        // The parent chain is complete for every GRAY node, so this lookup
        // cannot miss while the invariant holds.
        match parents.get(cursor) {
            Some(parent) => {
                path.push((*parent).to_string());
                cursor = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}
