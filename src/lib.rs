// src/lib.rs

pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod staging;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditChainRecorder, ChainValidation};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::JobDefinition;
use crate::engine::{
    ExecutionReport, ExecutionRuntime, RuntimeEvent, SimulationProcessor, StateChangeEvent,
    TransactionOutcome, TransactionProcessor, spawn_workers,
};
use crate::errors::{ActivationError, StagingError};
use crate::graph::{DependencyGraph, ExecutionPlan, TransactionId, find_cycle, plan_waves};
use crate::staging::{StagingHandle, StagingLifecycleManager, spawn_sweeper};

/// An activated job: validated graph plus computed execution plan.
#[derive(Debug, Clone)]
pub struct ActivatedJob {
    pub graph: DependencyGraph,
    pub plan: ExecutionPlan,
}

/// Validate a job's dependency definitions and compute its execution plan.
///
/// Activation is the gate: a job whose graph fails construction or contains
/// a cycle never reaches the runtime.
pub fn activate(job: &JobDefinition) -> Result<ActivatedJob, ActivationError> {
    let graph = DependencyGraph::build(&job.transaction_ids(), job.dependency_edges())?;
    if let Some(path) = find_cycle(&graph) {
        return Err(ActivationError::CycleDetected { path });
    }
    let plan = plan_waves(&job.job.id, &graph, job.job.parallel_threads);
    Ok(ActivatedJob { graph, plan })
}

/// Engine tuning knobs with conservative defaults.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Cadence of dependency-timeout evaluation.
    pub tick_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
        }
    }
}

/// A live execution: channels into the runtime plus its join handles.
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    events_tx: mpsc::Sender<RuntimeEvent>,
    observer_rx: mpsc::Receiver<StateChangeEvent>,
    staging: StagingLifecycleManager,
    sweeper_shutdown: CancellationToken,
    sweeper: JoinHandle<()>,
    runtime: JoinHandle<Result<ExecutionReport>>,
}

impl ExecutionHandle {
    /// Report a transaction outcome from outside the worker pool.
    pub async fn report_outcome(
        &self,
        transaction: impl Into<TransactionId>,
        outcome: TransactionOutcome,
    ) -> Result<()> {
        self.events_tx
            .send(RuntimeEvent::OutcomeReported {
                transaction: transaction.into(),
                outcome,
            })
            .await
            .map_err(|_| anyhow!("execution runtime is no longer accepting events"))
    }

    /// Handle for the staging resource provisioned for `transaction`.
    pub fn staging_handle(&self, transaction: &str) -> Result<StagingHandle, StagingError> {
        self.staging.handle(self.execution_id, transaction)
    }

    /// Request early cleanup of a transaction's staging resource. Served by
    /// the runtime while the execution is live; after it finishes, expired
    /// resources are the TTL sweeper's job.
    pub async fn reclaim_staging(&self, transaction: impl Into<TransactionId>) -> Result<()> {
        self.events_tx
            .send(RuntimeEvent::StagingReclaimRequested {
                transaction: transaction.into(),
            })
            .await
            .map_err(|_| anyhow!("execution runtime is no longer accepting events"))
    }

    /// Verify the audit chain (inclusive sequence range) while the execution
    /// is live. A detected mismatch poisons the recorder and halts the
    /// execution at its next audit append.
    pub async fn validate_audit_chain(&self, from: u64, to: u64) -> Result<ChainValidation> {
        let (reply, rx) = oneshot::channel();
        self.events_tx
            .send(RuntimeEvent::AuditValidationRequested { from, to, reply })
            .await
            .map_err(|_| anyhow!("execution runtime is no longer accepting events"))?;
        rx.await
            .map_err(|_| anyhow!("execution runtime dropped the validation request"))
    }

    /// Request graceful cancellation of everything outstanding.
    pub async fn shutdown(&self) -> Result<()> {
        self.events_tx
            .send(RuntimeEvent::ShutdownRequested)
            .await
            .map_err(|_| anyhow!("execution runtime is no longer accepting events"))
    }

    /// Next observer event, if the runtime is still emitting them.
    pub async fn next_state_change(&mut self) -> Option<StateChangeEvent> {
        self.observer_rx.recv().await
    }

    /// Clone of the runtime event sender, for signal wiring.
    pub fn events_sender(&self) -> mpsc::Sender<RuntimeEvent> {
        self.events_tx.clone()
    }

    pub fn staging(&self) -> &StagingLifecycleManager {
        &self.staging
    }

    /// Wait for the execution to finish and collect its report.
    pub async fn wait(self) -> Result<ExecutionReport> {
        let report = self
            .runtime
            .await
            .map_err(|e| anyhow!("execution runtime task panicked: {e}"))??;
        self.sweeper_shutdown.cancel();
        let _ = self.sweeper.await;
        Ok(report)
    }
}

/// Activate a job and start executing it.
///
/// Wires together:
/// - graph construction, cycle check, and wave planning
/// - the worker pool running `processor`
/// - the staging lifecycle manager and its TTL sweeper
/// - the audit chain
/// - the single-writer execution runtime and its timeout ticker
pub fn start_execution(
    job: JobDefinition,
    processor: Arc<dyn TransactionProcessor>,
    options: EngineOptions,
) -> Result<ExecutionHandle, ActivationError> {
    let activated = activate(&job)?;
    let execution_id = Uuid::new_v4();

    let (events_tx, events_rx) = mpsc::channel::<RuntimeEvent>(64);
    let (observer_tx, observer_rx) = mpsc::channel::<StateChangeEvent>(256);

    let dispatch_tx = spawn_workers(
        activated.plan.parallel_threads,
        processor,
        events_tx.clone(),
    );

    let staging = StagingLifecycleManager::new();
    let sweeper_shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        staging.clone(),
        Duration::from_secs(job.job.sweep_interval_seconds.max(1)),
        sweeper_shutdown.clone(),
    );

    // Timeout ticker: stops once the runtime drops its receiver.
    {
        let tx = events_tx.clone();
        let tick_interval = options.tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(RuntimeEvent::Tick).await.is_err() {
                    break;
                }
            }
        });
    }

    let runtime = ExecutionRuntime::new(
        execution_id,
        job,
        activated.graph,
        activated.plan,
        staging.clone(),
        AuditChainRecorder::new(),
        events_rx,
        dispatch_tx,
        observer_tx,
    );
    let runtime = tokio::spawn(runtime.run());

    Ok(ExecutionHandle {
        execution_id,
        events_tx,
        observer_rx,
        staging,
        sweeper_shutdown,
        sweeper,
        runtime,
    })
}

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let job = load_and_validate(&args.job)?;

    if args.plan {
        print_plan(&job)?;
        return Ok(());
    }

    let processor: Arc<dyn TransactionProcessor> = Arc::new(SimulationProcessor::default());
    let handle = start_execution(job, processor, EngineOptions::default())?;

    // Ctrl-C → graceful shutdown.
    {
        let tx = handle.events_sender();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let report = handle.wait().await?;
    info!(
        execution = %report.execution_id,
        audit_records = report.audit.len(),
        "run complete"
    );
    if !report.success {
        return Err(anyhow!(
            "execution {} finished with failures: failed={:?} cancelled={:?}",
            report.execution_id,
            report.failed,
            report.cancelled
        ));
    }
    Ok(())
}

/// `--plan` output: waves, levels, and lock participation.
fn print_plan(job: &JobDefinition) -> Result<()> {
    let activated = activate(job).map_err(|e| anyhow!(e))?;
    let plan = &activated.plan;

    println!("batchdag plan for job '{}'", plan.job_id);
    println!("  parallel_threads = {}", plan.parallel_threads);
    println!();

    println!("waves ({}):", plan.waves.len());
    for (i, wave) in plan.waves.iter().enumerate() {
        println!("  wave {i}: {}", wave.join(", "));
    }

    if !plan.resource_locks.is_empty() {
        println!();
        println!("resource locks:");
        for (token, participants) in &plan.resource_locks {
            println!("  {token}: {}", participants.join(", "));
        }
    }

    Ok(())
}
