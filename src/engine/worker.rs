// src/engine/worker.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::runtime::RuntimeEvent;
use crate::graph::TransactionId;
use crate::staging::StagingHandle;

/// Result of processing one transaction type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Completed,
    Failed(String),
    /// Processing stopped at a cancellation checkpoint.
    Cancelled,
}

/// Everything a processor needs to load one transaction type's data.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    pub execution_id: Uuid,
    pub transaction: TransactionId,
    /// Staging resource provisioned for this dispatch.
    pub staging: StagingHandle,
    pub chunk_size: u32,
    /// Hard processing deadline; the worker fails the transaction when the
    /// processor runs past it.
    pub timeout_seconds: u64,
    /// Cooperative cancellation: the processor is expected to stop at its
    /// next checkpoint once this fires.
    pub cancel: CancellationToken,
}

/// The actual transaction-type processing (bulk load, transform, transfer)
/// is an external collaborator's job; the scheduler only dispatches to it.
#[async_trait]
pub trait TransactionProcessor: Send + Sync {
    async fn process(&self, ctx: TransactionContext) -> TransactionOutcome;
}

/// A dispatched transaction, handed from the runtime to the worker pool.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub wave: usize,
    pub context: TransactionContext,
}

/// Spawn the bounded worker pool.
///
/// `capacity` workers share one dispatch queue; each picks up the next
/// dispatch, races processing against the cancellation token and the
/// transaction's `timeout_seconds` deadline, and reports a `WorkerFinished`
/// event back to the runtime. Mirrors the executor-loop shape: workers own
/// no scheduler state, they only consume dispatches and emit events.
pub fn spawn_workers(
    capacity: usize,
    processor: Arc<dyn TransactionProcessor>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> mpsc::Sender<Dispatch> {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel::<Dispatch>(capacity);
    let rx = Arc::new(Mutex::new(rx));

    for slot in 0..capacity {
        let rx = Arc::clone(&rx);
        let processor = Arc::clone(&processor);
        let runtime_tx = runtime_tx.clone();

        tokio::spawn(async move {
            debug!(worker = slot, "worker started");
            loop {
                // Hold the queue lock only while receiving, never while
                // processing, so the rest of the pool keeps draining.
                let dispatch = { rx.lock().await.recv().await };
                let Some(dispatch) = dispatch else {
                    break;
                };

                let ctx = dispatch.context.clone();
                let transaction = ctx.transaction.clone();
                let cancel = ctx.cancel.clone();
                let deadline = Duration::from_secs(ctx.timeout_seconds.max(1));

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => TransactionOutcome::Cancelled,
                    out = tokio::time::timeout(deadline, processor.process(ctx)) => {
                        match out {
                            Ok(out) => out,
                            Err(_) => TransactionOutcome::Failed(format!(
                                "processing exceeded timeout of {}s",
                                deadline.as_secs()
                            )),
                        }
                    }
                };

                if runtime_tx
                    .send(RuntimeEvent::WorkerFinished {
                        transaction,
                        worker: slot,
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    // Runtime gone; nothing left to report to.
                    break;
                }
            }
            debug!(worker = slot, "worker stopped (queue closed)");
        });
    }

    info!(capacity, "worker pool started");
    tx
}

/// Built-in processor used by CLI runs and tests: sleeps briefly to model
/// load work, honours cancellation, always succeeds.
pub struct SimulationProcessor {
    pub step: Duration,
}

impl Default for SimulationProcessor {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(10),
        }
    }
}

#[async_trait]
impl TransactionProcessor for SimulationProcessor {
    async fn process(&self, ctx: TransactionContext) -> TransactionOutcome {
        debug!(
            transaction = %ctx.transaction,
            table = %ctx.staging.table_name,
            chunk_size = ctx.chunk_size,
            "simulating transaction load"
        );
        tokio::time::sleep(self.step).await;
        TransactionOutcome::Completed
    }
}
