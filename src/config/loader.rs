// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::model::JobDefinition;
use crate::config::validate::validate_job;

/// Read and parse a job definition file.
///
/// This only performs TOML deserialization; it does **not** run semantic
/// validation (graph correctness, cycles). Use [`load_and_validate`] for
/// that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<JobDefinition> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading job definition at {:?}", path))?;

    let job: JobDefinition = toml::from_str(&contents)
        .with_context(|| format!("parsing TOML job definition from {:?}", path))?;

    Ok(job)
}

/// Load a job definition and run full validation.
///
/// The recommended entry point: a definition returned from here is known to
/// reference only declared transaction types, carry well-formed dependency
/// attributes, and describe an acyclic graph.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<JobDefinition> {
    let job = load_from_path(&path)?;
    validate_job(&job)?;
    Ok(job)
}
