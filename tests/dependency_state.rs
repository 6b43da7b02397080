// tests/dependency_state.rs

mod common;
use crate::common::init_tracing;

use std::collections::BTreeSet;
use std::error::Error;

use chrono::{DateTime, Duration, TimeZone, Utc};

use batchdag::graph::{
    DependencyEdge, DependencyGraph, RetryPolicy, plan_waves,
};
use batchdag::state::{
    DependencyState, DependencyStateTracker, DependencyStatus, NodeColor,
};

type TestResult = Result<(), Box<dyn Error>>;

fn ids(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).single().expect("valid timestamp")
}

fn tracker_for(graph: DependencyGraph) -> DependencyStateTracker {
    let plan = plan_waves("test", &graph, 4);
    DependencyStateTracker::new(graph, &plan, t0())
}

/// accounts -> {balances, postings} -> statements.
fn diamond() -> DependencyGraph {
    DependencyGraph::build(
        &ids(&["accounts", "balances", "postings", "statements"]),
        vec![
            DependencyEdge::sequential("accounts", "balances"),
            DependencyEdge::sequential("accounts", "postings"),
            DependencyEdge::sequential("balances", "statements"),
            DependencyEdge::sequential("postings", "statements"),
        ],
    )
    .expect("diamond builds")
}

#[test]
fn completion_satisfies_edges_and_unlocks_dependents() -> TestResult {
    init_tracing();
    let mut tracker = tracker_for(diamond());

    assert_eq!(tracker.eligible(), vec!["accounts".to_string()]);

    tracker.transaction_started("accounts", 0, t0());
    let effects = tracker.transaction_completed("accounts", t0() + Duration::seconds(5));

    assert_eq!(
        effects.newly_eligible,
        vec!["balances".to_string(), "postings".to_string()]
    );
    assert_eq!(
        tracker.edge_state("accounts", "balances").map(|e| e.status),
        Some(DependencyStatus::Satisfied)
    );
    assert_eq!(
        tracker.node("accounts").map(|n| n.color),
        Some(NodeColor::Black)
    );

    // statements still waits on both middle transactions.
    tracker.transaction_started("balances", 0, t0());
    let effects = tracker.transaction_completed("balances", t0() + Duration::seconds(10));
    assert!(effects.newly_eligible.is_empty());

    tracker.transaction_started("postings", 1, t0());
    let effects = tracker.transaction_completed("postings", t0() + Duration::seconds(12));
    assert_eq!(effects.newly_eligible, vec!["statements".to_string()]);
    Ok(())
}

#[test]
fn failure_cascades_cancellation_to_all_dependents() -> TestResult {
    init_tracing();
    let mut tracker = tracker_for(diamond());

    tracker.transaction_started("accounts", 0, t0());
    let effects = tracker.transaction_failed("accounts", t0() + Duration::seconds(5));

    let mut cancelled = effects.cancelled.clone();
    cancelled.sort();
    assert_eq!(
        cancelled,
        vec![
            "balances".to_string(),
            "postings".to_string(),
            "statements".to_string()
        ]
    );
    assert_eq!(
        tracker.node("accounts").map(|n| n.color),
        Some(NodeColor::Error)
    );
    for id in ["balances", "postings", "statements"] {
        assert_eq!(tracker.node(id).map(|n| n.color), Some(NodeColor::Blocked));
    }
    assert_eq!(
        tracker.edge_state("accounts", "balances").map(|e| e.status),
        Some(DependencyStatus::Failed)
    );
    assert_eq!(
        tracker.edge_state("balances", "statements").map(|e| e.status),
        Some(DependencyStatus::Cancelled)
    );
    assert!(tracker.all_terminal());
    Ok(())
}

#[test]
fn timeout_without_retry_budget_fails_the_edge_and_cancels_downstream() -> TestResult {
    init_tracing();
    let graph = DependencyGraph::build(
        &ids(&["a", "b", "d"]),
        vec![
            DependencyEdge {
                max_wait_seconds: 30,
                ..DependencyEdge::sequential("a", "b")
            },
            DependencyEdge::sequential("b", "d"),
        ],
    )?;
    let mut tracker = tracker_for(graph);

    // Under the bound: nothing moves.
    let effects = tracker.tick(t0() + Duration::seconds(29));
    assert!(effects.transitions.is_empty());
    assert!(effects.failed_edges.is_empty());

    // Over the bound with no retries: TIMEOUT then FAILED, and the target's
    // whole downstream is cancelled.
    let effects = tracker.tick(t0() + Duration::seconds(31));
    assert_eq!(effects.failed_edges, vec![("a".to_string(), "b".to_string())]);
    assert_eq!(effects.cancelled, vec!["b".to_string(), "d".to_string()]);

    assert_eq!(
        tracker.edge_state("a", "b").map(|e| e.status),
        Some(DependencyStatus::Failed)
    );
    assert_eq!(
        tracker.edge_state("b", "d").map(|e| e.status),
        Some(DependencyStatus::Cancelled)
    );
    assert_eq!(tracker.node("b").map(|n| n.color), Some(NodeColor::Blocked));
    assert_eq!(tracker.node("d").map(|n| n.color), Some(NodeColor::Blocked));
    Ok(())
}

#[test]
fn timed_out_edge_retries_and_resolves_once_the_source_completed() -> TestResult {
    init_tracing();
    let graph = DependencyGraph::build(
        &ids(&["a", "b"]),
        vec![DependencyEdge {
            max_wait_seconds: 30,
            retry: RetryPolicy::ExponentialBackoff {
                base_delay_ms: 1_000,
                max_retries: 2,
                max_delay_ms: 8_000,
            },
            ..DependencyEdge::sequential("a", "b")
        }],
    )?;
    let mut tracker = tracker_for(graph);

    tracker.transaction_started("a", 0, t0());
    assert_eq!(
        tracker.edge_state("a", "b").map(|e| e.status),
        Some(DependencyStatus::Blocked)
    );

    // First timeout: retry scheduled 1s out, nothing failed.
    let effects = tracker.tick(t0() + Duration::seconds(31));
    assert!(effects.failed_edges.is_empty());
    assert!(effects.cancelled.is_empty());
    assert_eq!(
        tracker.edge_state("a", "b").map(|e| e.status),
        Some(DependencyStatus::Timeout)
    );

    // The source completes while the retry is pending; the timed-out edge
    // stays in TIMEOUT until the retry fires.
    let effects = tracker.transaction_completed("a", t0() + Duration::milliseconds(31_500));
    assert!(effects.newly_eligible.is_empty());
    assert_eq!(
        tracker.edge_state("a", "b").map(|e| e.status),
        Some(DependencyStatus::Timeout)
    );

    // Retry due: the edge resolves straight to SATISFIED and the target
    // becomes eligible.
    let effects = tracker.tick(t0() + Duration::seconds(33));
    assert_eq!(effects.newly_eligible, vec!["b".to_string()]);
    let edge = tracker.edge_state("a", "b").expect("edge exists");
    assert_eq!(edge.status, DependencyStatus::Satisfied);
    assert_eq!(edge.retry_count, 1);
    assert!(tracker.is_eligible("b"));
    Ok(())
}

#[test]
fn exponential_backoff_doubles_and_caps() {
    let policy = RetryPolicy::ExponentialBackoff {
        base_delay_ms: 500,
        max_retries: 5,
        max_delay_ms: 1_500,
    };

    assert_eq!(policy.delay_ms(0), 500);
    assert_eq!(policy.delay_ms(1), 1_000);
    assert_eq!(policy.delay_ms(2), 1_500);
    assert_eq!(policy.delay_ms(10), 1_500);
    assert_eq!(policy.max_retries(), 5);

    assert_eq!(RetryPolicy::None.max_retries(), 0);
    assert_eq!(RetryPolicy::None.delay_ms(3), 0);
}

#[test]
fn terminal_statuses_are_never_resurrected() -> TestResult {
    let edge = DependencyEdge::sequential("a", "b");

    // Cancelled stays cancelled.
    let mut state = DependencyState::new(&edge, t0());
    assert!(state.cancel());
    assert!(!state.source_completed());
    assert_eq!(state.status, DependencyStatus::Cancelled);

    // Satisfied stays satisfied.
    let mut state = DependencyState::new(&edge, t0());
    assert!(state.source_completed());
    assert!(!state.source_failed());
    assert!(!state.cancel());
    assert_eq!(state.status, DependencyStatus::Satisfied);
    Ok(())
}

#[test]
fn wait_clock_accumulates_while_pending() -> TestResult {
    let graph = DependencyGraph::build(
        &ids(&["a", "b"]),
        vec![DependencyEdge {
            max_wait_seconds: 300,
            ..DependencyEdge::sequential("a", "b")
        }],
    )?;
    let mut tracker = tracker_for(graph);

    tracker.tick(t0() + Duration::seconds(42));
    let edge = tracker.edge_state("a", "b").expect("edge exists");
    assert_eq!(edge.status, DependencyStatus::Pending);
    assert_eq!(edge.total_wait_ms, 42_000);
    Ok(())
}
