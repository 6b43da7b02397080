// src/engine/runtime.rs

//! Single-writer execution event loop.
//!
//! The runtime owns every piece of mutable execution state: the dependency
//! state tracker, the lock table, the audit chain, the wave cursor. Workers,
//! tickers, and external outcome reports feed it [`RuntimeEvent`]s over one
//! channel; it never shares state behind locks. Observers get a best-effort
//! [`StateChangeEvent`] stream for dashboards.

use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditChainRecorder, AuditEvent, ChainValidation};
use crate::config::JobDefinition;
use crate::engine::locks::LockTable;
use crate::engine::worker::{Dispatch, TransactionContext, TransactionOutcome};
use crate::graph::{DependencyGraph, DependencyKind, ExecutionPlan, TransactionId};
use crate::staging::StagingLifecycleManager;
use crate::state::{
    DependencyStateTracker, DependencyStatus, Effects, NodeColor, Transition, TransactionState,
};

/// Inputs to the runtime's event loop.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A pool worker finished processing a dispatched transaction.
    WorkerFinished {
        transaction: TransactionId,
        worker: usize,
        outcome: TransactionOutcome,
    },
    /// An outcome reported from outside the pool (operator or external
    /// processor). Overrides any in-flight worker for the same transaction.
    OutcomeReported {
        transaction: TransactionId,
        outcome: TransactionOutcome,
    },
    /// Explicit early staging cleanup, typically after a successful transfer
    /// out of the staging resource.
    StagingReclaimRequested { transaction: TransactionId },
    /// On-demand chain verification; the result goes back over the reply
    /// channel. Detected tampering poisons the recorder, which halts the
    /// execution at its next append.
    AuditValidationRequested {
        from: u64,
        to: u64,
        reply: oneshot::Sender<ChainValidation>,
    },
    /// Periodic timeout evaluation.
    Tick,
    /// Cancel everything outstanding and finish with `success = false`.
    ShutdownRequested,
}

/// Best-effort observer stream; dropped when nobody is listening.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum StateChangeEvent {
    ExecutionStarted {
        execution_id: Uuid,
    },
    WaveStarted {
        wave: usize,
        transactions: Vec<TransactionId>,
    },
    TransactionDispatched {
        transaction: TransactionId,
        wave: usize,
    },
    TransactionCompleted {
        transaction: TransactionId,
    },
    TransactionFailed {
        transaction: TransactionId,
        reason: String,
    },
    TransactionCancelled {
        transaction: TransactionId,
    },
    DependencyChanged {
        source: TransactionId,
        target: TransactionId,
        from: DependencyStatus,
        to: DependencyStatus,
    },
    ExecutionFinished {
        execution_id: Uuid,
        success: bool,
    },
}

/// Final accounting for one execution.
#[derive(Debug)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub job_id: String,
    pub success: bool,
    pub completed: Vec<TransactionId>,
    pub failed: Vec<TransactionId>,
    pub cancelled: Vec<TransactionId>,
    /// The execution's audit chain, handed back for archival.
    pub audit: AuditChainRecorder,
}

pub struct ExecutionRuntime {
    execution_id: Uuid,
    job: JobDefinition,
    graph: DependencyGraph,
    plan: ExecutionPlan,
    tracker: DependencyStateTracker,
    staging: StagingLifecycleManager,
    recorder: AuditChainRecorder,
    locks: LockTable,

    events_rx: mpsc::Receiver<RuntimeEvent>,
    dispatch_tx: mpsc::Sender<Dispatch>,
    observer_tx: mpsc::Sender<StateChangeEvent>,

    /// Cooperative cancellation handles for in-flight dispatches.
    cancel_tokens: HashMap<TransactionId, CancellationToken>,
    /// Failure reasons, captured before the tracker cascade runs so the
    /// audit record can carry them.
    fail_reasons: HashMap<TransactionId, String>,
    /// When each lock-blocked transaction started waiting.
    lock_wait_since: HashMap<TransactionId, DateTime<Utc>>,

    wave_cursor: usize,
    wave_index: usize,
    /// Current-wave members not yet dispatched (waiting on locks or retries).
    wave_pending: Vec<TransactionId>,
    /// Current-wave members dispatched but not yet terminal.
    wave_active: Vec<TransactionId>,
    dispatch_seq: usize,
}

impl ExecutionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: Uuid,
        job: JobDefinition,
        graph: DependencyGraph,
        plan: ExecutionPlan,
        staging: StagingLifecycleManager,
        recorder: AuditChainRecorder,
        events_rx: mpsc::Receiver<RuntimeEvent>,
        dispatch_tx: mpsc::Sender<Dispatch>,
        observer_tx: mpsc::Sender<StateChangeEvent>,
    ) -> Self {
        let tracker = DependencyStateTracker::new(graph.clone(), &plan, Utc::now());
        let locks = LockTable::from_plan(&plan);

        Self {
            execution_id,
            job,
            graph,
            plan,
            tracker,
            staging,
            recorder,
            locks,
            events_rx,
            dispatch_tx,
            observer_tx,
            cancel_tokens: HashMap::new(),
            fail_reasons: HashMap::new(),
            lock_wait_since: HashMap::new(),
            wave_cursor: 0,
            wave_index: 0,
            wave_pending: Vec::new(),
            wave_active: Vec::new(),
            dispatch_seq: 0,
        }
    }

    /// Drive the execution to completion.
    ///
    /// Wave barrier: wave N+1 is not opened until every member of wave N is
    /// terminal. Within a wave, dispatch follows the plan's priority order
    /// and waits on resource locks where needed.
    pub async fn run(mut self) -> Result<ExecutionReport> {
        let job_id = self.job.job.id.clone();
        info!(
            job = %job_id,
            execution = %self.execution_id,
            waves = self.plan.waves.len(),
            "execution starting"
        );

        self.audit(AuditEvent::JobActivated {
            job_id: job_id.clone(),
            transaction_count: self.job.transaction.len(),
            edge_count: self.graph.edges().len(),
        })?;
        self.audit(AuditEvent::PlanComputed {
            job_id: job_id.clone(),
            wave_count: self.plan.waves.len(),
        })?;
        self.audit(AuditEvent::ExecutionStarted {
            job_id: job_id.clone(),
        })?;
        self.notify(StateChangeEvent::ExecutionStarted {
            execution_id: self.execution_id,
        });

        self.advance_waves(Utc::now()).await?;

        while !self.is_complete() {
            let Some(event) = self.events_rx.recv().await else {
                warn!("runtime event channel closed before execution finished");
                break;
            };

            match event {
                RuntimeEvent::WorkerFinished {
                    transaction,
                    worker,
                    outcome,
                } => {
                    debug!(
                        transaction = %transaction,
                        worker,
                        outcome = ?outcome,
                        "worker finished"
                    );
                    self.handle_outcome(&transaction, outcome, Utc::now())
                        .await?;
                }
                RuntimeEvent::OutcomeReported {
                    transaction,
                    outcome,
                } => {
                    // The external report wins; stop the pool worker if one
                    // is still running this transaction.
                    if let Some(token) = self.cancel_tokens.get(&transaction) {
                        token.cancel();
                    }
                    self.handle_outcome(&transaction, outcome, Utc::now())
                        .await?;
                }
                RuntimeEvent::StagingReclaimRequested { transaction } => {
                    self.handle_reclaim(&transaction, Utc::now())?;
                }
                RuntimeEvent::AuditValidationRequested { from, to, reply } => {
                    let result = self.recorder.validate_chain(from, to);
                    let _ = reply.send(result);
                }
                RuntimeEvent::Tick => {
                    self.handle_tick(Utc::now()).await?;
                }
                RuntimeEvent::ShutdownRequested => {
                    self.handle_shutdown()?;
                    break;
                }
            }
        }

        self.finish(&job_id)
    }

    /// Apply one transaction outcome, then re-pump dispatch and waves.
    async fn handle_outcome(
        &mut self,
        id: &str,
        outcome: TransactionOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.cancel_tokens.remove(id);
        let already_terminal = self
            .tracker
            .node(id)
            .map(|n| n.color.is_terminal())
            .unwrap_or(true);

        match outcome {
            TransactionOutcome::Completed if !already_terminal => {
                if let Ok(handle) = self.staging.handle(self.execution_id, id) {
                    // Resource dropped by an early sweep is not fatal here.
                    let _ = self.staging.mark_ready(&handle);
                }
                let effects = self.tracker.transaction_completed(id, now);
                self.record_transitions(&effects.transitions)?;
                self.wave_active.retain(|t| t != id);
                self.release_locks(id)?;
            }
            TransactionOutcome::Failed(reason) if !already_terminal => {
                self.wave_active.retain(|t| t != id);
                self.fail_transaction(id, reason, now)?;
                self.release_locks(id)?;
            }
            TransactionOutcome::Cancelled | TransactionOutcome::Completed
            | TransactionOutcome::Failed(_) => {
                // Cancellation checkpoint hit, or a late worker report after
                // an external outcome already landed. The tracker is already
                // terminal for this transaction.
                self.wave_active.retain(|t| t != id);
                self.release_locks(id)?;
            }
        }

        self.pump_dispatch(now).await?;
        self.maybe_advance(now).await
    }

    /// Evaluate dependency timeouts and lock-wait bounds.
    async fn handle_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        let effects = self.tracker.tick(now);
        self.record_transitions(&effects.transitions)?;
        self.cleanup_cancelled(&effects.cancelled)?;

        // A transaction stuck behind a resource lock is bounded by the
        // tightest max_wait of its lock edges; exceeding it fails the
        // transaction rather than starving the wave forever.
        let waiting: Vec<(TransactionId, DateTime<Utc>)> = self
            .lock_wait_since
            .iter()
            .map(|(id, since)| (id.clone(), *since))
            .collect();
        for (id, since) in waiting {
            let Some(bound) = self.lock_wait_bound(&id) else {
                continue;
            };
            let waited = now.signed_duration_since(since).num_seconds().max(0) as u64;
            if waited > bound {
                warn!(
                    transaction = %id,
                    waited_seconds = waited,
                    bound_seconds = bound,
                    "resource lock wait exceeded bound"
                );
                self.lock_wait_since.remove(&id);
                self.wave_pending.retain(|t| t != &id);
                self.fail_transaction(
                    &id,
                    format!("resource lock wait exceeded {bound}s"),
                    now,
                )?;
                self.release_locks(&id)?;
            }
        }

        self.pump_dispatch(now).await?;
        self.maybe_advance(now).await
    }

    /// Reclaim one staging resource ahead of its TTL and record it.
    fn handle_reclaim(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let handle = match self.staging.handle(self.execution_id, id) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(transaction = %id, error = %err, "reclaim requested for unknown staging resource");
                return Ok(());
            }
        };
        match self.staging.reclaim(&handle, now) {
            Ok(()) => self.audit(AuditEvent::StagingReclaimed {
                table_name: handle.table_name.clone(),
            }),
            Err(err) => {
                warn!(table = %handle.table_name, error = %err, "staging reclaim skipped");
                Ok(())
            }
        }
    }

    /// Cancel everything outstanding.
    fn handle_shutdown(&mut self) -> Result<()> {
        warn!(execution = %self.execution_id, "shutdown requested");

        let outstanding: Vec<TransactionId> = self
            .plan
            .order
            .iter()
            .filter(|id| {
                self.tracker
                    .node(id)
                    .map(|n| !n.color.is_terminal())
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut effects = Effects::default();
        for id in &outstanding {
            self.tracker.cascade_cancel(id, &mut effects);
        }
        self.record_transitions(&effects.transitions)?;
        self.cleanup_cancelled(&effects.cancelled)?;

        self.wave_pending.clear();
        self.wave_active.clear();
        self.wave_cursor = self.plan.waves.len();
        Ok(())
    }

    /// Open the next wave(s) once the current one has fully drained.
    async fn advance_waves(&mut self, now: DateTime<Utc>) -> Result<()> {
        loop {
            if !self.wave_pending.is_empty() || !self.wave_active.is_empty() {
                return Ok(());
            }
            let Some(wave) = self.plan.waves.get(self.wave_cursor).cloned() else {
                return Ok(());
            };
            let index = self.wave_cursor;
            self.wave_cursor += 1;

            // Cascade cancellation may have emptied a wave before it opened.
            let members: Vec<TransactionId> = wave
                .into_iter()
                .filter(|id| {
                    self.tracker
                        .node(id)
                        .map(|n| !n.color.is_terminal())
                        .unwrap_or(false)
                })
                .collect();
            if members.is_empty() {
                continue;
            }

            info!(wave = index, transactions = ?members, "wave opened");
            self.notify(StateChangeEvent::WaveStarted {
                wave: index,
                transactions: members.clone(),
            });
            self.wave_index = index;
            self.wave_pending = members;
            self.pump_dispatch(now).await?;
        }
    }

    async fn maybe_advance(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.wave_pending.is_empty() && self.wave_active.is_empty() {
            self.advance_waves(now).await?;
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.wave_pending.is_empty()
            && self.wave_active.is_empty()
            && self.wave_cursor >= self.plan.waves.len()
    }

    /// Dispatch every pending wave member that is eligible and lock-free.
    ///
    /// Runs passes until a pass makes no progress, so a lock freed by one
    /// dispatch's failure is re-offered to its waiters immediately.
    async fn pump_dispatch(&mut self, now: DateTime<Utc>) -> Result<()> {
        loop {
            let mut progress = false;

            for id in self.wave_pending.clone() {
                let terminal = self
                    .tracker
                    .node(&id)
                    .map(|n| n.color.is_terminal())
                    .unwrap_or(true);
                if terminal {
                    self.wave_pending.retain(|t| t != &id);
                    self.lock_wait_since.remove(&id);
                    progress = true;
                    continue;
                }
                if !self.tracker.is_eligible(&id) {
                    continue;
                }
                if !self.locks.try_acquire(&id) {
                    self.lock_wait_since.entry(id.clone()).or_insert(now);
                    continue;
                }
                self.lock_wait_since.remove(&id);
                for token in self.locks.required(&id).to_vec() {
                    self.audit(AuditEvent::LockAcquired {
                        token,
                        transaction: id.clone(),
                    })?;
                }

                self.wave_pending.retain(|t| t != &id);
                progress = true;
                if self.dispatch(&id, now).await? {
                    self.wave_active.push(id);
                }
            }

            if !progress {
                return Ok(());
            }
        }
    }

    /// Provision staging and hand the transaction to the worker pool.
    ///
    /// Returns false when the dispatch failed before reaching a worker (the
    /// failure cascade has already been applied).
    async fn dispatch(&mut self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let spec = self.job.staging_spec(id);
        let staging = match self.staging.provision(self.execution_id, id, spec, now) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(transaction = %id, error = %err, "staging provisioning failed");
                self.fail_transaction(
                    id,
                    format!("staging provisioning failed: {err}"),
                    now,
                )?;
                self.release_locks(id)?;
                return Ok(false);
            }
        };
        self.audit(AuditEvent::StagingProvisioned {
            transaction: id.to_string(),
            table_name: staging.table_name.clone(),
        })?;

        let cfg = self.job.transaction.get(id).cloned().unwrap_or_default();
        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(id.to_string(), cancel.clone());

        let worker_hint = self.dispatch_seq % self.plan.parallel_threads.max(1);
        self.dispatch_seq += 1;

        let transitions = self.tracker.transaction_started(id, worker_hint, now);
        self.audit(AuditEvent::TransactionDispatched {
            transaction: id.to_string(),
            wave: self.wave_index,
            worker: worker_hint,
        })?;
        self.record_transitions(&transitions)?;
        self.notify(StateChangeEvent::TransactionDispatched {
            transaction: id.to_string(),
            wave: self.wave_index,
        });

        let dispatch = Dispatch {
            wave: self.wave_index,
            context: TransactionContext {
                execution_id: self.execution_id,
                transaction: id.to_string(),
                staging,
                chunk_size: cfg.chunk_size,
                timeout_seconds: cfg.timeout_seconds,
                cancel,
            },
        };
        self.dispatch_tx
            .send(dispatch)
            .await
            .map_err(|_| anyhow!("worker pool queue closed"))?;
        Ok(true)
    }

    /// Apply a definitive failure and its cancellation cascade.
    fn fail_transaction(
        &mut self,
        id: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.fail_reasons.insert(id.to_string(), reason);
        if let Ok(handle) = self.staging.handle(self.execution_id, id) {
            let _ = self.staging.mark_failed(&handle);
        }
        let effects = self.tracker.transaction_failed(id, now);
        self.record_transitions(&effects.transitions)?;
        self.cleanup_cancelled(&effects.cancelled)
    }

    /// Drop cascade-cancelled transactions from every runtime ledger and stop
    /// their in-flight workers.
    fn cleanup_cancelled(&mut self, cancelled: &[TransactionId]) -> Result<()> {
        for id in cancelled {
            if let Some(token) = self.cancel_tokens.get(id) {
                token.cancel();
            }
            self.wave_pending.retain(|t| t != id);
            self.wave_active.retain(|t| t != id);
            self.lock_wait_since.remove(id);
            self.release_locks(id)?;
        }
        Ok(())
    }

    fn release_locks(&mut self, id: &str) -> Result<()> {
        let held = self.locks.held_by(id);
        self.locks.release(id);
        for token in held {
            self.audit(AuditEvent::LockReleased {
                token,
                transaction: id.to_string(),
            })?;
        }
        Ok(())
    }

    /// Tightest lock-edge wait bound that applies to `id`, if any.
    fn lock_wait_bound(&self, id: &str) -> Option<u64> {
        self.graph
            .edges()
            .iter()
            .filter(|e| {
                e.kind == DependencyKind::ResourceLock && (e.source == id || e.target == id)
            })
            .map(|e| e.max_wait_seconds)
            .min()
    }

    /// Mirror tracker transitions into the audit chain and observer stream.
    fn record_transitions(&mut self, transitions: &[Transition]) -> Result<()> {
        for transition in transitions {
            match transition {
                Transition::Dependency {
                    source,
                    target,
                    from,
                    to,
                    retry_count,
                } => {
                    self.audit(AuditEvent::DependencyTransition {
                        source: source.clone(),
                        target: target.clone(),
                        from: from.to_string(),
                        to: to.to_string(),
                        retry_count: *retry_count,
                    })?;
                    self.notify(StateChangeEvent::DependencyChanged {
                        source: source.clone(),
                        target: target.clone(),
                        from: *from,
                        to: *to,
                    });
                }
                Transition::Transaction { id, state } => match state {
                    // Dispatch is audited as TransactionDispatched.
                    TransactionState::Running | TransactionState::NotStarted => {}
                    TransactionState::Completed => {
                        self.audit(AuditEvent::TransactionCompleted {
                            transaction: id.clone(),
                        })?;
                        self.notify(StateChangeEvent::TransactionCompleted {
                            transaction: id.clone(),
                        });
                    }
                    TransactionState::Failed => {
                        let reason = self
                            .fail_reasons
                            .get(id)
                            .cloned()
                            .unwrap_or_else(|| "processing failed".to_string());
                        self.audit(AuditEvent::TransactionFailed {
                            transaction: id.clone(),
                            reason: reason.clone(),
                        })?;
                        self.notify(StateChangeEvent::TransactionFailed {
                            transaction: id.clone(),
                            reason,
                        });
                    }
                    TransactionState::Cancelled => {
                        self.audit(AuditEvent::TransactionCancelled {
                            transaction: id.clone(),
                        })?;
                        self.notify(StateChangeEvent::TransactionCancelled {
                            transaction: id.clone(),
                        });
                    }
                },
            }
        }
        Ok(())
    }

    fn finish(mut self, job_id: &str) -> Result<ExecutionReport> {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut cancelled = Vec::new();

        for id in &self.plan.order {
            match self.tracker.node(id).map(|n| n.color) {
                Some(NodeColor::Black) => completed.push(id.clone()),
                Some(NodeColor::Error) => failed.push(id.clone()),
                _ => cancelled.push(id.clone()),
            }
        }
        let success = failed.is_empty() && cancelled.is_empty();

        self.audit(AuditEvent::ExecutionFinished {
            job_id: job_id.to_string(),
            success,
        })?;
        self.notify(StateChangeEvent::ExecutionFinished {
            execution_id: self.execution_id,
            success,
        });
        info!(
            execution = %self.execution_id,
            success,
            completed = completed.len(),
            failed = failed.len(),
            cancelled = cancelled.len(),
            "execution finished"
        );

        Ok(ExecutionReport {
            execution_id: self.execution_id,
            job_id: job_id.to_string(),
            success,
            completed,
            failed,
            cancelled,
            audit: self.recorder,
        })
    }

    /// Every state change lands in the chain; a poisoned chain halts the
    /// execution rather than running unrecorded.
    fn audit(&mut self, event: AuditEvent) -> Result<()> {
        self.recorder.append(Some(self.execution_id), event)?;
        Ok(())
    }

    fn notify(&self, event: StateChangeEvent) {
        // Observability only; a slow or absent observer never blocks the loop.
        let _ = self.observer_tx.try_send(event);
    }
}
