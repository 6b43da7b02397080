// src/config/validate.rs

use anyhow::{Result, anyhow};

use crate::config::model::JobDefinition;
use crate::graph::{DependencyGraph, find_cycle};

/// Run semantic validation against a parsed job definition.
///
/// Checks:
/// - the job declares at least one transaction type
/// - `parallel_threads >= 1`
/// - every dependency endpoint is a declared transaction type, no self-loops,
///   no duplicate pairs, weights in range, lock tokens present where required
///   (all enforced by graph construction)
/// - the dependency graph is acyclic
///
/// It does **not** evaluate `condition` predicates or `staging_schema` text;
/// both are opaque to the scheduler.
pub fn validate_job(job: &JobDefinition) -> Result<()> {
    if job.transaction.is_empty() {
        return Err(anyhow!(
            "job definition must contain at least one [transaction.<id>] section"
        ));
    }

    if job.job.parallel_threads == 0 {
        return Err(anyhow!("[job].parallel_threads must be >= 1 (got 0)"));
    }

    let graph = DependencyGraph::build(&job.transaction_ids(), job.dependency_edges())
        .map_err(|e| anyhow!(e))?;

    if let Some(path) = find_cycle(&graph) {
        return Err(anyhow!(
            "cycle detected in dependency graph: {}",
            path.join(" -> ")
        ));
    }

    Ok(())
}
