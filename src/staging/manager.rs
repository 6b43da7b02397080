// src/staging/manager.rs

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::StagingError;
use crate::graph::TransactionId;
use crate::staging::resource::{
    CleanupPolicy, StagingHandle, StagingResource, StagingSpec, StagingStatus,
};

/// Outcome of one sweep cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub dropped: Vec<String>,
    pub archived: Vec<String>,
}

/// Allocation layer for staging resources.
///
/// Cheaply clonable; the runtime and the background sweeper share one
/// instance. Name reservation happens under the inner lock, which is the
/// compare-and-swap that keeps table names globally unique even under
/// concurrent provisioning.
#[derive(Clone)]
pub struct StagingLifecycleManager {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    resources: BTreeMap<(Uuid, TransactionId), StagingResource>,
    reserved_names: HashSet<String>,
}

impl StagingLifecycleManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                resources: BTreeMap::new(),
                reserved_names: HashSet::new(),
            })),
        }
    }

    /// Allocate a uniquely-named resource for `(execution, transaction type)`.
    ///
    /// At most one resource per pair; a second provision attempt is an error
    /// rather than a silent replacement.
    pub fn provision(
        &self,
        execution_id: Uuid,
        transaction_type: &str,
        spec: StagingSpec,
        now: DateTime<Utc>,
    ) -> Result<StagingHandle, StagingError> {
        let mut inner = self.inner.lock().expect("staging lock poisoned");

        let key = (execution_id, transaction_type.to_string());
        if inner.resources.contains_key(&key) {
            return Err(StagingError::AlreadyProvisioned(
                transaction_type.to_string(),
            ));
        }

        // Reserve-or-retry: uuid suffixes collide essentially never, but the
        // reservation set is what actually guarantees uniqueness.
        let table_name = loop {
            let candidate = format!(
                "stg_{}_{}",
                sanitize(transaction_type),
                &Uuid::new_v4().simple().to_string()[..12]
            );
            if inner.reserved_names.insert(candidate.clone()) {
                break candidate;
            }
        };

        let resource = StagingResource {
            execution_id,
            transaction_type: transaction_type.to_string(),
            table_name: table_name.clone(),
            schema_definition: spec.schema,
            partition_strategy: spec.partition_strategy,
            cleanup_policy: spec.cleanup_policy,
            ttl_hours: spec.ttl_hours,
            created_at: now,
            dropped_at: None,
            row_count: 0,
            size_bytes: 0,
            status: StagingStatus::Provisioned,
        };
        let handle = resource.handle();
        inner.resources.insert(key, resource);

        info!(
            execution = %execution_id,
            transaction = %transaction_type,
            table = %table_name,
            "staging resource provisioned"
        );
        Ok(handle)
    }

    /// Handle for an already-provisioned resource.
    pub fn handle(
        &self,
        execution_id: Uuid,
        transaction_type: &str,
    ) -> Result<StagingHandle, StagingError> {
        let inner = self.inner.lock().expect("staging lock poisoned");
        inner
            .resources
            .get(&(execution_id, transaction_type.to_string()))
            .map(|r| r.handle())
            .ok_or_else(|| StagingError::NotFound(transaction_type.to_string()))
    }

    /// Mark the resource populated and validated.
    pub fn mark_ready(&self, handle: &StagingHandle) -> Result<(), StagingError> {
        self.update_status(handle, StagingStatus::Ready)
    }

    /// Mark the resource failed (load aborted, contents suspect).
    pub fn mark_failed(&self, handle: &StagingHandle) -> Result<(), StagingError> {
        self.update_status(handle, StagingStatus::Failed)
    }

    /// Record observed data volume for capacity accounting.
    pub fn record_volume(
        &self,
        handle: &StagingHandle,
        row_count: u64,
        size_bytes: u64,
    ) -> Result<(), StagingError> {
        let mut inner = self.inner.lock().expect("staging lock poisoned");
        let resource = lookup_mut(&mut inner, handle)?;
        resource.row_count = row_count;
        resource.size_bytes = size_bytes;
        Ok(())
    }

    /// Explicit early cleanup, used after a successful transfer to target.
    pub fn reclaim(&self, handle: &StagingHandle, now: DateTime<Utc>) -> Result<(), StagingError> {
        let mut inner = self.inner.lock().expect("staging lock poisoned");
        let resource = lookup_mut(&mut inner, handle)?;
        if resource.is_dropped() {
            return Err(StagingError::AlreadyDropped(resource.table_name.clone()));
        }
        resource.status = StagingStatus::Dropped;
        resource.dropped_at = Some(now);
        let name = resource.table_name.clone();
        inner.reserved_names.remove(&name);
        info!(table = %name, "staging resource reclaimed");
        Ok(())
    }

    /// Reclaim resources past their TTL.
    ///
    /// `AutoDrop` resources are dropped outright; `ArchiveThenDrop` resources
    /// are archived first. `Manual` and not-yet-expired resources are left
    /// alone; `KeepMetadata` drops the data but leaves the record in a
    /// `MetadataOnly` terminal state.
    /// Never fatal to the owning execution, which has already completed —
    /// anything that cannot be processed this cycle is retried on the next.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut inner = self.inner.lock().expect("staging lock poisoned");
        let mut report = SweepReport::default();
        let mut freed_names = Vec::new();

        for resource in inner.resources.values_mut() {
            if resource.is_dropped() || !resource.ttl_elapsed(now) {
                continue;
            }
            match resource.cleanup_policy {
                CleanupPolicy::Manual => continue,
                CleanupPolicy::ArchiveThenDrop => {
                    resource.status = StagingStatus::Archived;
                    report.archived.push(resource.table_name.clone());
                    resource.dropped_at = Some(now);
                    resource.status = StagingStatus::Dropped;
                    freed_names.push(resource.table_name.clone());
                    report.dropped.push(resource.table_name.clone());
                }
                CleanupPolicy::AutoDrop => {
                    resource.dropped_at = Some(now);
                    resource.status = StagingStatus::Dropped;
                    freed_names.push(resource.table_name.clone());
                    report.dropped.push(resource.table_name.clone());
                }
                CleanupPolicy::KeepMetadata => {
                    resource.dropped_at = Some(now);
                    resource.status = StagingStatus::MetadataOnly;
                    freed_names.push(resource.table_name.clone());
                    report.dropped.push(resource.table_name.clone());
                }
            }
            debug!(
                table = %resource.table_name,
                policy = ?resource.cleanup_policy,
                "staging resource swept"
            );
        }

        for name in freed_names {
            inner.reserved_names.remove(&name);
        }

        report
    }

    /// Snapshot of a resource record, primarily for observability and tests.
    pub fn resource(
        &self,
        execution_id: Uuid,
        transaction_type: &str,
    ) -> Option<StagingResource> {
        let inner = self.inner.lock().expect("staging lock poisoned");
        inner
            .resources
            .get(&(execution_id, transaction_type.to_string()))
            .cloned()
    }

    fn update_status(
        &self,
        handle: &StagingHandle,
        status: StagingStatus,
    ) -> Result<(), StagingError> {
        let mut inner = self.inner.lock().expect("staging lock poisoned");
        let resource = lookup_mut(&mut inner, handle)?;
        if resource.is_dropped() {
            warn!(
                table = %resource.table_name,
                "status update on dropped staging resource ignored"
            );
            return Err(StagingError::AlreadyDropped(resource.table_name.clone()));
        }
        resource.status = status;
        Ok(())
    }
}

impl Default for StagingLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_mut<'a>(
    inner: &'a mut Inner,
    handle: &StagingHandle,
) -> Result<&'a mut StagingResource, StagingError> {
    inner
        .resources
        .get_mut(&(handle.execution_id, handle.transaction_type.clone()))
        .ok_or_else(|| StagingError::NotFound(handle.transaction_type.clone()))
}

/// Table-name-safe rendition of a transaction id.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
