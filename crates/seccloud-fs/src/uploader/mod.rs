//! Deferred, coalescing upload of changed files.
//!
//! Every open file has one [`FileUploader`]. Writes never wait for the
//! network: they only move the uploader's state machine, and the upload
//! itself runs on the shared [`WorkerPool`] once the file has been quiet for
//! `next_update_timeout`.
//!
//! # State machine
//!
//! ```text
//!            change                  deadline              finished
//!   Idle ──────────────▶ Scheduled ──────────▶ Running ─────────────▶ Idle
//!                        │  ▲   change:                │ change
//!                        └──┘   push deadline back     ▼
//!                                              RunningDirty ──finished──▶ Scheduled
//! ```
//!
//! - At most one upload per file is running at any time.
//! - A change during a running upload schedules exactly one follow-up round,
//!   so the last write is always uploaded.
//! - A failed upload leaves the file dirty; the next change or close retries.

mod scheduler;

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use seccloud_core::{CloudStore, SubmitError, WorkerPool};
use tracing::{debug, info, trace, warn};

use crate::error::FsResult;

pub use scheduler::UploadScheduler;

/// Collaborators shared by all uploaders of one filesystem.
#[derive(Clone)]
pub struct UploadContext {
    /// Destination of uploads; normally an encrypting store.
    pub store: Arc<dyn CloudStore>,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<UploadScheduler>,
    /// Quiescence period after the last change.
    pub next_update_timeout: Duration,
    /// Where upload snapshots are spilled; `None` uses the system temp dir.
    pub spill_dir: Option<PathBuf>,
}

impl std::fmt::Debug for UploadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadContext")
            .field("store", &self.store.name())
            .field("next_update_timeout", &self.next_update_timeout)
            .field("spill_dir", &self.spill_dir)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled { deadline: Instant },
    Running,
    /// Changed while running; upload again at `deadline` once finished.
    RunningDirty { deadline: Instant },
}

#[derive(Debug)]
struct UploadState {
    phase: Phase,
    /// Local content is newer than the last successful upload.
    dirty: bool,
    /// Bumped whenever a scheduler entry is pushed or superseded.
    generation: u64,
}

/// Upload counters for one file.
#[derive(Debug, Default)]
pub struct UploadStats {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    /// Bytes reported by the store for successful uploads.
    pub bytes: AtomicU64,
}

impl UploadStats {
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Per-file deferred uploader.
pub struct FileUploader {
    data_id: String,
    cache_path: PathBuf,
    content_lock: Arc<Mutex<()>>,
    ctx: UploadContext,
    state: Mutex<UploadState>,
    idle: Condvar,
    stats: UploadStats,
    this: Weak<FileUploader>,
}

impl FileUploader {
    /// Create the uploader for the cache file at `cache_path`.
    ///
    /// `content_lock` must be the lock guarding every write to that file.
    pub fn new(
        data_id: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        content_lock: Arc<Mutex<()>>,
        ctx: UploadContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            data_id: data_id.into(),
            cache_path: cache_path.into(),
            content_lock,
            ctx,
            state: Mutex::new(UploadState {
                phase: Phase::Idle,
                dirty: false,
                generation: 0,
            }),
            idle: Condvar::new(),
            stats: UploadStats::default(),
            this: this.clone(),
        })
    }

    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    pub fn stats(&self) -> &UploadStats {
        &self.stats
    }

    /// Whether local content has changes not yet uploaded successfully.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Whether no upload is scheduled or running.
    pub fn is_idle(&self) -> bool {
        self.state.lock().phase == Phase::Idle
    }

    /// Record a change to the local content.
    ///
    /// Never blocks on I/O. Called with the content lock held.
    pub fn content_changed(&self) {
        let deadline = Instant::now() + self.ctx.next_update_timeout;
        let mut state = self.state.lock();
        state.dirty = true;

        match state.phase {
            Phase::Idle => {
                state.generation += 1;
                state.phase = Phase::Scheduled { deadline };
                let generation = state.generation;
                trace!(data_id = %self.data_id, "Upload scheduled");
                if !self.push_deadline(deadline, generation) {
                    state.phase = Phase::Idle;
                }
            }
            // The pending timer entry re-arms itself with the later deadline.
            Phase::Scheduled { .. } => state.phase = Phase::Scheduled { deadline },
            Phase::Running | Phase::RunningDirty { .. } => {
                state.phase = Phase::RunningDirty { deadline };
            }
        }
    }

    /// Start any pending upload now instead of waiting for quiescence.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Scheduled { .. } => self.start(&mut state),
            Phase::Idle if state.dirty => self.start(&mut state),
            Phase::RunningDirty { .. } => {
                state.phase = Phase::RunningDirty {
                    deadline: Instant::now(),
                };
            }
            Phase::Idle | Phase::Running => {}
        }
    }

    /// Wait until no upload is scheduled or running.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.phase != Phase::Idle {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.phase == Phase::Idle;
            }
        }
        true
    }

    /// Timer callback from the [`UploadScheduler`].
    pub(crate) fn on_deadline(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            trace!(data_id = %self.data_id, "Stale upload deadline ignored");
            return;
        }
        let Phase::Scheduled { deadline } = state.phase else {
            return;
        };
        if Instant::now() < deadline {
            // Pushed back by later writes.
            if !self.push_deadline(deadline, generation) {
                state.phase = Phase::Idle;
                self.idle.notify_all();
            }
            return;
        }
        self.start(&mut state);
    }

    fn push_deadline(&self, deadline: Instant, generation: u64) -> bool {
        let Some(this) = self.this.upgrade() else {
            return false;
        };
        let accepted = self.ctx.scheduler.schedule(deadline, generation, this);
        if !accepted {
            warn!(data_id = %self.data_id, "Upload scheduler stopped, content left dirty");
        }
        accepted
    }

    /// Move to `Running` and hand one job to the pool.
    fn start(&self, state: &mut UploadState) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        // Supersede any timer entry still in the heap.
        state.generation += 1;
        state.phase = Phase::Running;
        state.dirty = false;

        match self.ctx.pool.submit(move || this.run()) {
            Ok(()) => {
                self.stats.started.fetch_add(1, Ordering::SeqCst);
            }
            Err(SubmitError::QueueFull { capacity }) => {
                debug!(data_id = %self.data_id, capacity, "Worker queue full, retrying upload later");
                state.dirty = true;
                let deadline = Instant::now() + self.ctx.next_update_timeout;
                state.phase = Phase::Scheduled { deadline };
                if !self.push_deadline(deadline, state.generation) {
                    state.phase = Phase::Idle;
                    self.idle.notify_all();
                }
            }
            Err(SubmitError::Shutdown) => {
                warn!(data_id = %self.data_id, "Worker pool shut down, content left dirty");
                state.dirty = true;
                state.phase = Phase::Idle;
                self.idle.notify_all();
            }
        }
    }

    /// Worker-pool job: snapshot, upload, then advance the state machine.
    fn run(&self) {
        let result = self.upload_snapshot();
        let mut state = self.state.lock();

        match &result {
            Ok(bytes) => {
                self.stats.succeeded.fetch_add(1, Ordering::SeqCst);
                self.stats.bytes.fetch_add(*bytes, Ordering::SeqCst);
                debug!(data_id = %self.data_id, bytes, "Upload complete");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                state.dirty = true;
                warn!(data_id = %self.data_id, error = %e, "Upload failed, will retry on next change or close");
            }
        }

        match state.phase {
            Phase::RunningDirty { deadline } => {
                state.generation += 1;
                state.phase = Phase::Scheduled { deadline };
                let generation = state.generation;
                if !self.push_deadline(deadline, generation) {
                    state.phase = Phase::Idle;
                    self.idle.notify_all();
                }
            }
            _ => {
                state.phase = Phase::Idle;
                self.idle.notify_all();
            }
        }
    }

    /// Copy the cache file aside under the content lock, then upload the copy.
    fn upload_snapshot(&self) -> FsResult<u64> {
        let (mut spill, len) = {
            let _guard = self.content_lock.lock();
            let mut cache = File::open(&self.cache_path)?;
            let mut spill = match &self.ctx.spill_dir {
                Some(dir) => tempfile::tempfile_in(dir)?,
                None => tempfile::tempfile()?,
            };
            let len = io::copy(&mut cache, &mut spill)?;
            (spill, len)
        };
        spill.seek(SeekFrom::Start(0))?;

        trace!(data_id = %self.data_id, len, "Snapshot taken, uploading");
        let written = self.ctx.store.upload(&self.data_id, &mut spill, len)?;
        Ok(written)
    }
}

impl Drop for FileUploader {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.dirty {
            info!(data_id = %self.data_id, "Uploader dropped with unsaved changes");
        }
    }
}

impl std::fmt::Debug for FileUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FileUploader")
            .field("data_id", &self.data_id)
            .field("phase", &state.phase)
            .field("dirty", &state.dirty)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seccloud_core::PoolConfig;
    use seccloud_core::testing::MemoryCloudStore;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache_path: PathBuf,
        lock: Arc<Mutex<()>>,
        store: Arc<MemoryCloudStore>,
        uploader: Arc<FileUploader>,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("file");
        fs::write(&cache_path, b"").unwrap();
        let store = Arc::new(MemoryCloudStore::new("mem://t"));
        let ctx = UploadContext {
            store: store.clone(),
            pool: Arc::new(WorkerPool::with_config(PoolConfig::default().with_threads(2)).unwrap()),
            scheduler: Arc::new(UploadScheduler::start().unwrap()),
            next_update_timeout: timeout,
            spill_dir: None,
        };
        let lock = Arc::new(Mutex::new(()));
        let uploader = FileUploader::new("id", &cache_path, Arc::clone(&lock), ctx);
        Fixture {
            _dir: dir,
            cache_path,
            lock,
            store,
            uploader,
        }
    }

    fn write(fx: &Fixture, data: &[u8]) {
        let _guard = fx.lock.lock();
        fs::write(&fx.cache_path, data).unwrap();
        fx.uploader.content_changed();
    }

    #[test]
    fn test_burst_collapses_into_one_upload() {
        let fx = fixture(Duration::from_millis(100));
        for i in 0..20u8 {
            write(&fx, &[i; 16]);
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(fx.store.upload_count(), 0, "upload must wait for quiescence");

        thread::sleep(Duration::from_millis(150));
        assert!(fx.uploader.wait_idle(Duration::from_secs(5)));
        assert_eq!(fx.store.upload_count(), 1);
        assert_eq!(fx.store.blob("id").unwrap(), vec![19u8; 16]);
        assert!(!fx.uploader.is_dirty());
    }

    #[test]
    fn test_change_during_upload_schedules_follow_up() {
        let fx = fixture(Duration::from_millis(20));
        fx.store.set_upload_latency(Duration::from_millis(200));

        write(&fx, b"first");
        // Wait until the first upload is running.
        let start = Instant::now();
        while fx.store.upload_count() == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        write(&fx, b"second");

        thread::sleep(Duration::from_millis(50));
        assert!(fx.uploader.wait_idle(Duration::from_secs(5)));
        assert_eq!(fx.store.upload_count(), 2);
        assert_eq!(fx.store.blob("id").unwrap(), b"second");
        assert_eq!(fx.store.max_concurrent_uploads(), 1);
    }

    #[test]
    fn test_flush_skips_quiescence() {
        let fx = fixture(Duration::from_secs(60));
        write(&fx, b"now");
        fx.uploader.flush();
        assert!(fx.uploader.wait_idle(Duration::from_secs(5)));
        assert_eq!(fx.store.blob("id").unwrap(), b"now");
    }

    #[test]
    fn test_failed_upload_stays_dirty_and_retries_on_flush() {
        let fx = fixture(Duration::from_secs(60));
        fx.store.fail_uploads(true);
        write(&fx, b"data");
        fx.uploader.flush();
        assert!(fx.uploader.wait_idle(Duration::from_secs(5)));
        assert!(fx.uploader.is_dirty());
        assert_eq!(fx.uploader.stats().failed(), 1);

        fx.store.fail_uploads(false);
        fx.uploader.flush();
        assert!(fx.uploader.wait_idle(Duration::from_secs(5)));
        assert!(!fx.uploader.is_dirty());
        assert_eq!(fx.store.blob("id").unwrap(), b"data");
    }

    #[test]
    fn test_flush_when_clean_does_nothing() {
        let fx = fixture(Duration::from_millis(10));
        fx.uploader.flush();
        assert!(fx.uploader.is_idle());
        assert_eq!(fx.uploader.stats().started(), 0);
    }

    #[test]
    fn test_pool_shutdown_leaves_dirty() {
        let fx = fixture(Duration::from_secs(60));
        fx.uploader.ctx.pool.wait();
        write(&fx, b"late");
        fx.uploader.flush();
        assert!(fx.uploader.is_idle());
        assert!(fx.uploader.is_dirty());
        assert_eq!(fx.store.upload_count(), 0);
    }
}
