// tests/graph_planning.rs

use std::collections::BTreeSet;
use std::error::Error;

use batchdag::graph::{
    DependencyEdge, DependencyGraph, DependencyKind, plan_waves,
};

type TestResult = Result<(), Box<dyn Error>>;

fn ids(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn lock_edge(source: &str, target: &str, token: &str) -> DependencyEdge {
    DependencyEdge {
        kind: DependencyKind::ResourceLock,
        lock_token: Some(token.to_string()),
        ..DependencyEdge::sequential(source, target)
    }
}

/// Diamond: accounts -> {postings, balances} -> statements.
fn diamond() -> DependencyGraph {
    DependencyGraph::build(
        &ids(&["accounts", "postings", "balances", "statements"]),
        vec![
            DependencyEdge::sequential("accounts", "postings"),
            DependencyEdge::sequential("accounts", "balances"),
            DependencyEdge::sequential("postings", "statements"),
            DependencyEdge::sequential("balances", "statements"),
        ],
    )
    .expect("diamond builds")
}

#[test]
fn diamond_plans_three_waves() -> TestResult {
    let plan = plan_waves("nightly", &diamond(), 4);

    assert_eq!(
        plan.waves,
        vec![
            vec!["accounts".to_string()],
            vec!["balances".to_string(), "postings".to_string()],
            vec!["statements".to_string()],
        ]
    );
    assert_eq!(plan.order.len(), 4);
    assert_eq!(plan.levels["accounts"], 0);
    assert_eq!(plan.levels["balances"], 1);
    assert_eq!(plan.levels["postings"], 1);
    assert_eq!(plan.levels["statements"], 2);
    Ok(())
}

#[test]
fn wave_and_rank_lookups_match_plan() -> TestResult {
    let plan = plan_waves("nightly", &diamond(), 4);

    assert_eq!(plan.wave_of("accounts"), Some(0));
    assert_eq!(plan.wave_of("statements"), Some(2));
    assert_eq!(plan.wave_of("missing"), None);
    assert_eq!(plan.rank_of("accounts"), Some(0));
    Ok(())
}

#[test]
fn higher_priority_dispatches_first_within_a_frontier() -> TestResult {
    // Three independent roots feeding one sink; priorities disambiguate.
    let graph = DependencyGraph::build(
        &ids(&["r1", "r2", "r3", "sink"]),
        vec![
            DependencyEdge {
                priority_weight: 10,
                ..DependencyEdge::sequential("r1", "sink")
            },
            DependencyEdge {
                priority_weight: 90,
                ..DependencyEdge::sequential("r2", "sink")
            },
            DependencyEdge {
                priority_weight: 50,
                ..DependencyEdge::sequential("r3", "sink")
            },
        ],
    )?;

    let plan = plan_waves("nightly", &graph, 4);
    assert_eq!(
        plan.waves[0],
        vec!["r2".to_string(), "r3".to_string(), "r1".to_string()]
    );
    Ok(())
}

#[test]
fn equal_priorities_fall_back_to_lexicographic_order() -> TestResult {
    let graph = DependencyGraph::build(
        &ids(&["c", "a", "b", "sink"]),
        vec![
            DependencyEdge::sequential("c", "sink"),
            DependencyEdge::sequential("a", "sink"),
            DependencyEdge::sequential("b", "sink"),
        ],
    )?;

    let plan = plan_waves("nightly", &graph, 4);
    assert_eq!(
        plan.waves[0],
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    Ok(())
}

#[test]
fn frontier_wider_than_capacity_splits_into_chunked_waves() -> TestResult {
    let graph = DependencyGraph::build(
        &ids(&["a", "b", "c", "d", "e"]),
        vec![
            DependencyEdge::sequential("a", "e"),
            DependencyEdge::sequential("b", "e"),
            DependencyEdge::sequential("c", "e"),
            DependencyEdge::sequential("d", "e"),
        ],
    )?;

    let plan = plan_waves("nightly", &graph, 2);
    assert_eq!(
        plan.waves,
        vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string(), "d".to_string()],
            vec!["e".to_string()],
        ]
    );
    // The level (longest path from a root) is unchanged by capacity chunking.
    assert_eq!(plan.levels["d"], 0);
    assert_eq!(plan.levels["e"], 1);
    Ok(())
}

#[test]
fn zero_capacity_is_clamped_to_one() -> TestResult {
    let graph = DependencyGraph::build(
        &ids(&["a", "b"]),
        vec![DependencyEdge::sequential("a", "b")],
    )?;

    let plan = plan_waves("nightly", &graph, 0);
    assert_eq!(plan.parallel_threads, 1);
    assert!(plan.waves.iter().all(|w| w.len() == 1));
    Ok(())
}

#[test]
fn resource_lock_edges_register_both_endpoints_under_the_token() -> TestResult {
    let graph = DependencyGraph::build(
        &ids(&["fx_trades", "fx_settle", "fx_report"]),
        vec![
            lock_edge("fx_trades", "fx_settle", "fx_desk"),
            lock_edge("fx_settle", "fx_report", "fx_desk"),
        ],
    )?;

    let plan = plan_waves("nightly", &graph, 4);
    let participants = &plan.resource_locks["fx_desk"];
    assert_eq!(participants.len(), 3);
    for id in ["fx_trades", "fx_settle", "fx_report"] {
        assert!(participants.contains(&id.to_string()));
    }
    Ok(())
}

#[test]
fn graph_accessors_reflect_declared_edges() -> TestResult {
    let graph = diamond();

    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.in_degree("statements"), 2);
    assert_eq!(graph.out_degree("accounts"), 2);
    assert_eq!(
        graph.successors_of("accounts"),
        &["balances".to_string(), "postings".to_string()]
    );
    assert_eq!(
        graph.predecessors_of("statements"),
        &["balances".to_string(), "postings".to_string()]
    );
    assert!(graph.edge("accounts", "postings").is_some());
    assert!(graph.edge("postings", "accounts").is_none());
    Ok(())
}
