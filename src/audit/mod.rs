// src/audit/mod.rs

//! Tamper-evident audit trail.
//!
//! Every scheduling decision, state transition, staging lifecycle event, and
//! configuration mutation is appended to a hash chain: each record's SHA-256
//! hash covers its canonical fields plus the previous record's hash, so
//! mutating any stored record invalidates it and everything after it.
//!
//! The recorder is a cross-cutting dependency invoked by every component on
//! every transition, not a pipeline stage.

pub mod record;
pub mod recorder;

pub use record::{AuditEvent, AuditRecord};
pub use recorder::{AuditChainRecorder, ChainValidation, validate_records};
