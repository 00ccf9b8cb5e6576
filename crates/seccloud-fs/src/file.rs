//! Cached cloud files.
//!
//! A [`CloudFile`] pairs a file's shared metadata with its local cache file
//! and its [`FileUploader`]. The cache file is authoritative while the file is
//! open; the remote copy catches up through deferred uploads.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use seccloud_core::{CloudStore, PoolConfig, WorkerPool};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::config::FsConfig;
use crate::content::{CachedContent, FileContent, SynchronizedContent, UploadingContent};
use crate::error::{FsError, FsResult};
use crate::metadata::{MetadataRepository, SharedMetadata};
use crate::uploader::{FileUploader, UploadContext, UploadScheduler};

/// One open file of the cloud filesystem.
pub struct CloudFile {
    metadata: SharedMetadata,
    cache_path: PathBuf,
    content_lock: Arc<Mutex<()>>,
    uploader: Arc<FileUploader>,
    store: Arc<dyn CloudStore>,
    metadata_repo: Arc<dyn MetadataRepository>,
    close_wait_timeout: Option<Duration>,
}

impl CloudFile {
    /// Open a fresh content channel on the cache file.
    ///
    /// The cache file must already exist (see [`create_content`](Self::create_content)
    /// and [`fetch_content`](Self::fetch_content)).
    pub fn content(&self) -> FsResult<Arc<dyn FileContent>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.cache_path)
            .map_err(|source| FsError::ContentOpen {
                path: self.path(),
                source,
            })?;

        let cached = CachedContent::new(file);
        let uploading = UploadingContent::new(
            Box::new(cached),
            Arc::clone(&self.metadata),
            Arc::clone(&self.uploader),
        );
        Ok(Arc::new(SynchronizedContent::new(
            Box::new(uploading),
            Arc::clone(&self.content_lock),
        )))
    }

    /// Create an empty cache file for a new file.
    pub fn create_content(&self) -> FsResult<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self.content_lock.lock();
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.cache_path)?;
        Ok(())
    }

    /// Download the remote copy into the cache file.
    ///
    /// The download lands in a temp file next to the cache file and replaces
    /// it only once complete. Returns the number of bytes fetched.
    #[instrument(level = "debug", skip(self), fields(data_id = %self.data_id()))]
    pub fn fetch_content(&self) -> FsResult<u64> {
        let dir = self
            .cache_path
            .parent()
            .ok_or_else(|| FsError::InvalidPath(self.path()))?;
        fs::create_dir_all(dir)?;

        let mut staging = NamedTempFile::new_in(dir)?;
        let bytes = self.store.download(&self.data_id(), staging.as_file_mut())?;
        staging.as_file_mut().flush()?;

        let _guard = self.content_lock.lock();
        staging
            .persist(&self.cache_path)
            .map_err(|e| FsError::Io(e.error))?;
        debug!(bytes, "Fetched remote content into cache");
        Ok(bytes)
    }

    /// Persist the current metadata snapshot.
    pub fn sync_metadata(&self) -> FsResult<()> {
        let snapshot = self.metadata.read().clone();
        self.metadata_repo.save(&snapshot)?;
        Ok(())
    }

    /// Expedite any pending upload and wait for it.
    ///
    /// Returns `false` if the upload was still in progress after `timeout`
    /// or the last attempt failed.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.uploader.flush();
        self.uploader.wait_idle(timeout) && !self.uploader.is_dirty()
    }

    pub fn uploader(&self) -> &Arc<FileUploader> {
        &self.uploader
    }

    /// How long closing a handle waits for its upload, if at all.
    pub fn close_wait_timeout(&self) -> Option<Duration> {
        self.close_wait_timeout
    }

    pub fn metadata(&self) -> &SharedMetadata {
        &self.metadata
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn name(&self) -> String {
        self.metadata.read().name().to_string()
    }

    pub fn path(&self) -> String {
        self.metadata.read().path().to_string()
    }

    pub fn parent(&self) -> String {
        self.metadata.read().parent().to_string()
    }

    pub fn is_directory(&self) -> bool {
        self.metadata.read().is_directory()
    }

    pub fn data_id(&self) -> String {
        self.metadata.read().data_id().to_string()
    }

    pub fn last_access(&self) -> SystemTime {
        self.metadata.read().last_access()
    }

    pub fn set_last_access(&self, time: SystemTime) {
        self.metadata.write().set_last_access(time);
    }

    pub fn last_modified(&self) -> SystemTime {
        self.metadata.read().last_modified()
    }

    pub fn set_last_modified(&self, time: SystemTime) {
        self.metadata.write().set_last_modified(time);
    }
}

impl std::fmt::Debug for CloudFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFile")
            .field("path", &self.path())
            .field("cache_path", &self.cache_path)
            .field("uploader", &self.uploader)
            .finish_non_exhaustive()
    }
}

/// Builds [`CloudFile`]s that share one store, worker pool and scheduler.
///
/// At most one live `CloudFile` exists per path, so a cache file always has a
/// single content lock and a single uploader.
pub struct CloudFileFactory {
    config: FsConfig,
    ctx: UploadContext,
    metadata_repo: Arc<dyn MetadataRepository>,
    open: Mutex<HashMap<String, Weak<CloudFile>>>,
}

impl CloudFileFactory {
    /// Validate `config` and start the background upload machinery.
    pub fn new(
        config: FsConfig,
        store: Arc<dyn CloudStore>,
        metadata_repo: Arc<dyn MetadataRepository>,
    ) -> FsResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.cache_root)?;

        let pool = WorkerPool::with_config(
            PoolConfig::default()
                .with_threads(config.upload_threads)
                .with_capacity(config.upload_queue_capacity)
                .with_thread_name("seccloud-upload"),
        )?;
        let scheduler = UploadScheduler::start()?;
        info!(
            cache_root = %config.cache_root.display(),
            store = store.name(),
            threads = config.upload_threads,
            "Cloud file factory ready"
        );

        let ctx = UploadContext {
            store,
            pool: Arc::new(pool),
            scheduler: Arc::new(scheduler),
            next_update_timeout: config.next_update_timeout,
            spill_dir: config.spill_dir.clone(),
        };
        Ok(Self {
            config,
            ctx,
            metadata_repo,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// The live `CloudFile` for `metadata`'s path, creating it if needed.
    pub fn open(&self, metadata: SharedMetadata) -> FsResult<Arc<CloudFile>> {
        let (path, data_id) = {
            let meta = metadata.read();
            (meta.path().to_string(), meta.data_id().to_string())
        };
        let cache_path = self.cache_path_for(&path)?;

        let mut open = self.open.lock();
        if let Some(file) = open.get(&path).and_then(Weak::upgrade) {
            return Ok(file);
        }
        open.retain(|_, weak| weak.strong_count() > 0);

        let content_lock = Arc::new(Mutex::new(()));
        let uploader = FileUploader::new(
            data_id,
            &cache_path,
            Arc::clone(&content_lock),
            self.ctx.clone(),
        );
        let file = Arc::new(CloudFile {
            metadata,
            cache_path,
            content_lock,
            uploader,
            store: Arc::clone(&self.ctx.store),
            metadata_repo: Arc::clone(&self.metadata_repo),
            close_wait_timeout: self.config.close_wait_timeout,
        });
        open.insert(path, Arc::downgrade(&file));
        Ok(file)
    }

    /// Local cache location of `path`.
    pub fn cache_path_for(&self, path: &str) -> FsResult<PathBuf> {
        let relative = path
            .strip_prefix('/')
            .ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.as_os_str().is_empty() || escapes {
            return Err(FsError::InvalidPath(path.to_string()));
        }
        Ok(self.config.cache_root.join(relative))
    }

    /// Number of files currently alive.
    pub fn open_files(&self) -> usize {
        self.open
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CloudStore> {
        &self.ctx.store
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.ctx.pool
    }

    /// Flush every live file, then stop the scheduler and drain the pool.
    ///
    /// Returns `false` if some file was still uploading after `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let live: Vec<Arc<CloudFile>> = self
            .open
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        let mut clean = true;
        for file in &live {
            if !file.flush(timeout) {
                warn!(path = %file.path(), "Upload not completed at shutdown");
                clean = false;
            }
        }
        self.ctx.scheduler.shutdown();
        self.ctx.pool.wait();
        info!(files = live.len(), clean, "Cloud file factory shut down");
        clean
    }
}

impl std::fmt::Debug for CloudFileFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFileFactory")
            .field("cache_root", &self.config.cache_root)
            .field("ctx", &self.ctx)
            .field("open_files", &self.open_files())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileMetadata, MemoryMetadataRepository};
    use seccloud_core::testing::MemoryCloudStore;
    use tempfile::TempDir;

    fn factory(dir: &TempDir) -> (CloudFileFactory, Arc<MemoryCloudStore>, Arc<MemoryMetadataRepository>) {
        let store = Arc::new(MemoryCloudStore::new("mem://t"));
        let repo = Arc::new(MemoryMetadataRepository::new());
        let config = FsConfig::new(dir.path()).next_update_timeout(Duration::from_millis(50));
        let factory = CloudFileFactory::new(config, store.clone(), repo.clone()).unwrap();
        (factory, store, repo)
    }

    #[test]
    fn test_one_live_file_per_path() {
        let dir = TempDir::new().unwrap();
        let (factory, _, _) = factory(&dir);

        let a = factory.open(FileMetadata::file("/x.txt").into_shared()).unwrap();
        let b = factory.open(FileMetadata::file("/x.txt").into_shared()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.open_files(), 1);

        drop(a);
        drop(b);
        assert_eq!(factory.open_files(), 0);
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let (factory, _, _) = factory(&dir);

        for bad in ["relative.txt", "/", "/a/../../etc/passwd", "/./x"] {
            let err = factory
                .open(FileMetadata::file(bad).into_shared())
                .unwrap_err();
            assert!(matches!(err, FsError::InvalidPath(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_missing_cache_file_is_content_open_error() {
        let dir = TempDir::new().unwrap();
        let (factory, _, _) = factory(&dir);
        let file = factory.open(FileMetadata::file("/missing.txt").into_shared()).unwrap();

        let err = file.content().unwrap_err();
        assert!(matches!(err, FsError::ContentOpen { ref path, .. } if path == "/missing.txt"));
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_fetch_content_populates_cache() {
        let dir = TempDir::new().unwrap();
        let (factory, store, _) = factory(&dir);
        let file = factory.open(FileMetadata::file("/docs/r.txt").into_shared()).unwrap();
        store.put_blob(file.data_id(), b"remote bytes".to_vec());

        assert_eq!(file.fetch_content().unwrap(), 12);
        let content = file.content().unwrap();
        assert_eq!(content.read_to_vec().unwrap(), b"remote bytes");
        assert_eq!(fs::read(dir.path().join("docs/r.txt")).unwrap(), b"remote bytes");
    }

    #[test]
    fn test_sync_metadata_saves_snapshot() {
        let dir = TempDir::new().unwrap();
        let (factory, _, repo) = factory(&dir);
        let file = factory.open(FileMetadata::file("/m.txt").into_shared()).unwrap();
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        file.set_last_modified(stamp);

        file.sync_metadata().unwrap();
        let saved = repo.find("/m.txt").unwrap().unwrap();
        assert_eq!(saved.last_modified(), stamp);
        assert_eq!(repo.save_count(), 1);
    }

    #[test]
    fn test_writes_reach_store_after_flush() {
        let dir = TempDir::new().unwrap();
        let (factory, store, _) = factory(&dir);
        let file = factory.open(FileMetadata::file("/w.txt").into_shared()).unwrap();
        file.create_content().unwrap();

        let content = file.content().unwrap();
        content.write_all_at(b"payload", 0).unwrap();
        assert!(file.flush(Duration::from_secs(5)));
        assert_eq!(store.blob(&file.data_id()).unwrap(), b"payload");

        assert!(factory.shutdown(Duration::from_secs(1)));
    }
}
