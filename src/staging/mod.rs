// src/staging/mod.rs

//! Ephemeral staging resources, one per `(execution, transaction type)`.
//!
//! - [`resource`] holds the resource record, handle, and cleanup policies.
//! - [`manager`] owns provisioning (atomic unique naming), status updates,
//!   explicit reclaim, and the TTL sweep.
//! - [`sweeper`] runs the sweep on a background interval task.

pub mod manager;
pub mod resource;
pub mod sweeper;

pub use manager::{StagingLifecycleManager, SweepReport};
pub use resource::{CleanupPolicy, StagingHandle, StagingResource, StagingSpec, StagingStatus};
pub use sweeper::spawn_sweeper;
