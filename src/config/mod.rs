// src/config/mod.rs

//! Job definition loading and validation.
//!
//! A job definition is a TOML file declaring the job's transaction types and
//! the dependency edges between them. [`loader`] reads and parses the file,
//! [`validate`] runs the semantic checks (including graph construction and
//! cycle rejection) before anything is scheduled.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{DependencyDecl, JobDefinition, JobSection, TransactionConfig};
pub use validate::validate_job;
