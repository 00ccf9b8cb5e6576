//! Open-file handle registry.
//!
//! Handles live in a bounded moka cache. A handle leaves the cache either by
//! an explicit [`FileHandleRegistry::destroy`] or by eviction (capacity or
//! idle timeout); both paths end in [`FileHandle::retire`], which runs its
//! cleanup exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::{debug, trace};

use crate::config::HandleCacheConfig;
use crate::content::FileContent;
use crate::error::FsResult;
use crate::file::CloudFile;

/// Handle ids are unique for the life of the process and never reused.
/// Zero is never issued.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// One open handle: a file plus the content channel opened for it.
pub struct FileHandle {
    file: Arc<CloudFile>,
    content: Arc<dyn FileContent>,
    retired: AtomicBool,
}

impl FileHandle {
    /// Open a new content channel on `file`.
    pub fn open(file: Arc<CloudFile>) -> FsResult<Self> {
        let content = file.content()?;
        Ok(Self {
            file,
            content,
            retired: AtomicBool::new(false),
        })
    }

    pub fn file(&self) -> &Arc<CloudFile> {
        &self.file
    }

    pub fn content(&self) -> &Arc<dyn FileContent> {
        &self.content
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Sync metadata, then close the content channel.
    ///
    /// Runs once; later calls return `false` without doing anything. Failures
    /// are logged and swallowed.
    pub fn retire(&self, id: u64) -> bool {
        if self.retired.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.file.sync_metadata() {
            debug!(handle = id, error = %e, "Metadata sync failed during cleanup");
        }
        if let Err(e) = self.content.close() {
            debug!(handle = id, error = %e, "Content close failed during cleanup");
        }
        if let Some(timeout) = self.file.close_wait_timeout()
            && !self.file.uploader().wait_idle(timeout)
        {
            debug!(handle = id, ?timeout, "Upload still running after close wait");
        }
        trace!(handle = id, "Handle retired");
        true
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.file.path())
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

/// Bounded registry mapping handle ids to open handles.
pub struct FileHandleRegistry {
    cache: Cache<u64, Arc<FileHandle>>,
    evictions: Arc<AtomicU64>,
}

impl FileHandleRegistry {
    pub fn new(config: &HandleCacheConfig) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let evicted = Arc::clone(&evictions);

        let mut builder = Cache::<u64, Arc<FileHandle>>::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |id: Arc<u64>, handle: Arc<FileHandle>, cause: RemovalCause| {
                if cause.was_evicted() {
                    evicted.fetch_add(1, Ordering::Relaxed);
                    debug!(handle = *id, ?cause, "Handle evicted");
                }
                handle.retire(*id);
            });
        if let Some(idle) = config.idle_timeout {
            builder = builder.time_to_idle(idle);
        }

        Self {
            cache: builder.build(),
            evictions,
        }
    }

    /// Insert `handle` under a fresh id.
    ///
    /// May evict (and retire) the least recently used handle.
    pub fn register(&self, handle: FileHandle) -> u64 {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        self.cache.insert(id, Arc::new(handle));
        trace!(handle = id, "Handle registered");
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<FileHandle>> {
        self.cache.get(&id)
    }

    /// Remove `id` and retire its handle.
    pub fn destroy(&self, id: u64) -> Option<Arc<FileHandle>> {
        let handle = self.cache.remove(&id)?;
        handle.retire(id);
        Some(handle)
    }

    /// Remove and retire every handle.
    pub fn destroy_all(&self) {
        let ids: Vec<u64> = self.cache.iter().map(|(id, _)| *id).collect();
        let count = ids.len();
        for id in ids {
            self.destroy(id);
        }
        self.cache.run_pending_tasks();
        debug!(count, "All handles destroyed");
    }

    /// Apply pending expirations and capacity evictions now.
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn len(&self) -> usize {
        self.cache.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles removed by capacity or idle eviction so far.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FileHandleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandleRegistry")
            .field("entries", &self.cache.entry_count())
            .field("evictions", &self.eviction_count())
            .finish()
    }
}
