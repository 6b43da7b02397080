// src/state/machine.rs

//! Per-edge dependency state machine.
//!
//! Each `(execution, dependency edge)` pair tracks the states of both
//! endpoint transactions plus an overall status. Status moves forward only:
//! a `Timeout` may return to `Pending` solely through the explicit retry
//! action while the retry policy has budget left, and terminal statuses are
//! never resurrected.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::graph::{DependencyEdge, RetryPolicy, TransactionId};

/// State of one endpoint transaction as seen by the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Overall status of the dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    Pending,
    Satisfied,
    Blocked,
    Failed,
    Timeout,
    Cancelled,
}

impl DependencyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DependencyStatus::Satisfied | DependencyStatus::Failed | DependencyStatus::Cancelled
        )
    }
}

impl std::fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DependencyStatus::Pending => "pending",
            DependencyStatus::Satisfied => "satisfied",
            DependencyStatus::Blocked => "blocked",
            DependencyStatus::Failed => "failed",
            DependencyStatus::Timeout => "timeout",
            DependencyStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionState::NotStarted => "not_started",
            TransactionState::Running => "running",
            TransactionState::Completed => "completed",
            TransactionState::Failed => "failed",
            TransactionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a timeout evaluation decided for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// Nothing changed.
    Unchanged,
    /// The wait exceeded its bound; a retry has been scheduled.
    TimedOutWillRetry { retry_at_ms: u64 },
    /// The wait exceeded its bound and the retry budget is exhausted.
    TimedOutExhausted,
    /// A scheduled retry became due; the edge is pending again.
    RetryStarted,
}

/// Runtime state for one dependency edge within one execution.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyState {
    pub source: TransactionId,
    pub target: TransactionId,
    pub source_state: TransactionState,
    pub target_state: TransactionState,
    pub status: DependencyStatus,
    pub wait_started_at: DateTime<Utc>,
    pub total_wait_ms: u64,
    pub retry_count: u32,
    /// When a scheduled retry becomes due, if the edge is in `Timeout`.
    pub retry_at: Option<DateTime<Utc>>,
    max_wait_ms: u64,
    retry: RetryPolicy,
}

impl DependencyState {
    /// The wait clock starts when the execution creates the edge state.
    pub fn new(edge: &DependencyEdge, now: DateTime<Utc>) -> Self {
        Self {
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_state: TransactionState::NotStarted,
            target_state: TransactionState::NotStarted,
            status: DependencyStatus::Pending,
            wait_started_at: now,
            total_wait_ms: 0,
            retry_count: 0,
            retry_at: None,
            max_wait_ms: edge.max_wait_seconds * 1000,
            retry: edge.retry.clone(),
        }
    }

    /// Forward-only transition guard. Returns false (and leaves the status
    /// untouched) when the move would resurrect a terminal or walk backwards.
    fn advance(&mut self, next: DependencyStatus) -> bool {
        use DependencyStatus::*;

        let allowed = match (self.status, next) {
            (Pending, Satisfied | Blocked | Timeout | Failed | Cancelled) => true,
            (Blocked, Satisfied | Timeout | Failed | Cancelled) => true,
            // Timeout resolves through retry exhaustion or cancellation; the
            // retry action itself goes through `start_retry`.
            (Timeout, Failed | Cancelled) => true,
            _ => false,
        };

        if allowed {
            self.status = next;
        }
        allowed
    }

    /// The upstream (source) transaction started running.
    pub fn source_running(&mut self) -> bool {
        self.source_state = TransactionState::Running;
        self.advance(DependencyStatus::Blocked)
    }

    /// The upstream transaction completed; the dependency is satisfied.
    pub fn source_completed(&mut self) -> bool {
        self.source_state = TransactionState::Completed;
        self.advance(DependencyStatus::Satisfied)
    }

    /// The upstream transaction definitively failed.
    pub fn source_failed(&mut self) -> bool {
        self.source_state = TransactionState::Failed;
        self.advance(DependencyStatus::Failed)
    }

    /// Cascade cancellation onto this edge.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.target_state = TransactionState::Cancelled;
        self.advance(DependencyStatus::Cancelled)
    }

    pub fn target_running(&mut self) {
        self.target_state = TransactionState::Running;
    }

    pub fn target_completed(&mut self) {
        self.target_state = TransactionState::Completed;
    }

    /// Evaluate the wait clock against `now`.
    ///
    /// While the edge is `Pending` or `Blocked`, the accumulated wait is
    /// `now - wait_started_at`. Exceeding `max_wait_seconds` moves the edge
    /// to `Timeout` and either schedules a retry (per policy) or reports
    /// exhaustion so the tracker can fail it.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickEvent {
        match self.status {
            DependencyStatus::Pending | DependencyStatus::Blocked => {
                let waited = now
                    .signed_duration_since(self.wait_started_at)
                    .num_milliseconds()
                    .max(0) as u64;
                self.total_wait_ms = waited;

                if waited <= self.max_wait_ms {
                    return TickEvent::Unchanged;
                }

                self.advance(DependencyStatus::Timeout);
                if self.retry_count < self.retry.max_retries() {
                    let delay_ms = self.retry.delay_ms(self.retry_count);
                    self.retry_at = Some(now + Duration::milliseconds(delay_ms as i64));
                    TickEvent::TimedOutWillRetry {
                        retry_at_ms: delay_ms,
                    }
                } else {
                    TickEvent::TimedOutExhausted
                }
            }
            DependencyStatus::Timeout => {
                match self.retry_at {
                    Some(due) if now >= due => {
                        self.start_retry(now);
                        TickEvent::RetryStarted
                    }
                    _ => TickEvent::Unchanged,
                }
            }
            _ => TickEvent::Unchanged,
        }
    }

    /// Explicit retry action: the only path out of `Timeout`. Resets the
    /// wait clock and consumes one retry. If the upstream completed while the
    /// retry was scheduled, the edge resolves to `Satisfied` right away.
    fn start_retry(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, DependencyStatus::Timeout);
        self.retry_count += 1;
        self.retry_at = None;
        self.wait_started_at = now;
        self.total_wait_ms = 0;
        self.status = match self.source_state {
            TransactionState::Completed => DependencyStatus::Satisfied,
            TransactionState::Running => DependencyStatus::Blocked,
            _ => DependencyStatus::Pending,
        };
    }

    pub fn max_wait_ms(&self) -> u64 {
        self.max_wait_ms
    }
}
