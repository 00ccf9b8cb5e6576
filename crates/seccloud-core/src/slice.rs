//! Removal of remote slices.
//!
//! A file stored remotely may be split into several slices, each living in a
//! named store. Unlinking the file deletes every slice independently: one
//! failing store must not stop the others, so a [`DeleteTask`] reports its
//! outcome as a `bool` and never returns an error.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::pool::WorkerPool;
use crate::store::{CloudStore, CloudStoreRegistry};

/// A unit of remote content and the store holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceMetadata {
    /// Content id of the slice inside its store.
    pub id: String,
    /// [`CloudStore::name`] of the owning store.
    pub store_name: String,
}

impl SliceMetadata {
    pub fn new(id: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store_name: store_name.into(),
        }
    }
}

impl fmt::Display for SliceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.store_name)
    }
}

/// Deletes one slice from one store.
pub struct DeleteTask {
    slice: SliceMetadata,
    store: Arc<dyn CloudStore>,
}

impl DeleteTask {
    /// Bind `slice` to the store it should be deleted from.
    pub fn new(slice: SliceMetadata, store: Arc<dyn CloudStore>) -> Self {
        Self { slice, store }
    }

    /// Bind `slice` to the registered store named in its metadata.
    ///
    /// Returns `None` if no such store is registered.
    pub fn resolve(slice: SliceMetadata, registry: &CloudStoreRegistry) -> Option<Self> {
        let store = registry.get(&slice.store_name)?;
        Some(Self::new(slice, store))
    }

    /// The slice this task deletes.
    pub fn slice(&self) -> &SliceMetadata {
        &self.slice
    }

    /// Delete the slice. Returns `true` on success.
    ///
    /// Failures are logged with the slice id and store name and reported only
    /// through the return value.
    pub fn call(&self) -> bool {
        debug!(
            slice = %self.slice.id,
            store = %self.store.name(),
            "Deleting slice"
        );
        match self.store.delete(&self.slice.id) {
            Ok(()) => {
                debug!(
                    slice = %self.slice.id,
                    store = %self.store.name(),
                    "Slice deleted"
                );
                true
            }
            Err(e) => {
                error!(
                    slice = %self.slice.id,
                    store = %self.store.name(),
                    error = %e,
                    "Failed to delete slice"
                );
                false
            }
        }
    }
}

impl fmt::Debug for DeleteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteTask")
            .field("slice", &self.slice)
            .field("store", &self.store.name())
            .finish()
    }
}

/// Outcome of a batch of slice deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Slices removed from their store.
    pub succeeded: Vec<SliceMetadata>,
    /// Slices still present remotely; candidates for a retry.
    pub failed: Vec<SliceMetadata>,
}

impl DeletionReport {
    /// Whether every slice was deleted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `tasks` in parallel on `pool` and collect their results.
///
/// Blocks until every task has finished. A full queue delays submission
/// rather than failing a task; only tasks refused by a shut-down pool count
/// as failed without running. Must not be called from a job on `pool`.
pub fn delete_slices(
    pool: &WorkerPool,
    tasks: impl IntoIterator<Item = DeleteTask>,
) -> DeletionReport {
    let mut report = DeletionReport::default();
    let mut pending = Vec::new();

    for task in tasks {
        let slice = task.slice.clone();
        match pool.submit_blocking_with_result(move || task.call()) {
            Ok(rx) => pending.push((slice, rx)),
            Err(e) => {
                warn!(slice = %slice, error = %e, "Could not schedule slice deletion");
                report.failed.push(slice);
            }
        }
    }

    for (slice, rx) in pending {
        // A disconnected receiver means the task panicked.
        if rx.recv().unwrap_or(false) {
            report.succeeded.push(slice);
        } else {
            report.failed.push(slice);
        }
    }

    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Slice deletion batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::testing::MemoryCloudStore;

    #[test]
    fn test_call_success() {
        let store = Arc::new(MemoryCloudStore::new("mem://a"));
        store.put_blob("s1", b"data".to_vec());

        let task = DeleteTask::new(SliceMetadata::new("s1", "mem://a"), store.clone());
        assert!(task.call());
        assert!(store.blob("s1").is_none());
    }

    #[test]
    fn test_call_failure_returns_false() {
        let store = Arc::new(MemoryCloudStore::new("mem://a"));
        store.put_blob("s1", b"data".to_vec());
        store.fail_deletes(true);

        let task = DeleteTask::new(SliceMetadata::new("s1", "mem://a"), store.clone());
        assert!(!task.call());
        assert!(store.blob("s1").is_some());
    }

    #[test]
    fn test_resolve_unknown_store() {
        let registry = CloudStoreRegistry::new();
        assert!(DeleteTask::resolve(SliceMetadata::new("s1", "mem://x"), &registry).is_none());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = Arc::new(MemoryCloudStore::new("mem://good"));
        let bad = Arc::new(MemoryCloudStore::new("mem://bad"));
        bad.fail_deletes(true);

        let registry = CloudStoreRegistry::new();
        registry.register(good.clone());
        registry.register(bad.clone());

        let slices = vec![
            SliceMetadata::new("s1", "mem://good"),
            SliceMetadata::new("s2", "mem://bad"),
            SliceMetadata::new("s3", "mem://good"),
        ];
        for slice in &slices {
            let store = if slice.store_name == "mem://good" { &good } else { &bad };
            store.put_blob(&slice.id, vec![1, 2, 3]);
        }

        let tasks = slices
            .iter()
            .cloned()
            .filter_map(|s| DeleteTask::resolve(s, &registry));
        let pool = WorkerPool::with_config(PoolConfig::default().with_threads(3)).unwrap();
        let report = delete_slices(&pool, tasks);

        assert!(!report.is_complete());
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed, vec![SliceMetadata::new("s2", "mem://bad")]);
        assert!(good.is_empty());
        assert!(bad.blob("s2").is_some());
    }

    #[test]
    fn test_batch_larger_than_queue_all_succeed() {
        let store = Arc::new(MemoryCloudStore::new("mem://a"));
        let pool = WorkerPool::with_config(
            PoolConfig::default().with_threads(2).with_capacity(4),
        )
        .unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|i| {
                let id = format!("s{i}");
                store.put_blob(&id, vec![0; 8]);
                DeleteTask::new(SliceMetadata::new(id, "mem://a"), store.clone())
            })
            .collect();

        let report = delete_slices(&pool, tasks);
        assert!(report.is_complete());
        assert_eq!(report.succeeded.len(), 100);
        assert!(store.is_empty());
        assert_eq!(pool.stats().jobs_rejected.load(std::sync::atomic::Ordering::Relaxed), 0);
    }

    #[test]
    fn test_batch_after_shutdown_fails_everything() {
        let store = Arc::new(MemoryCloudStore::new("mem://a"));
        let pool = WorkerPool::with_config(PoolConfig::default().with_threads(1)).unwrap();
        pool.wait();

        let report = delete_slices(
            &pool,
            vec![DeleteTask::new(SliceMetadata::new("s1", "mem://a"), store)],
        );
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
    }
}
