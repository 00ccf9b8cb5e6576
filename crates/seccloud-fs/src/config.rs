//! Filesystem configuration.
//!
//! Loaded from JSON at bootstrap. Durations use humantime notation
//! (`"5s"`, `"250ms"`, `"10m"`); every field has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default quiescence period before a changed file is uploaded.
pub const DEFAULT_NEXT_UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum number of open handles kept by the registry.
pub const DEFAULT_MAX_HANDLES: u64 = 1024;

/// Default number of upload/delete worker threads.
pub const DEFAULT_UPLOAD_THREADS: usize = 4;

/// Default capacity of the background job queue.
pub const DEFAULT_UPLOAD_QUEUE_CAPACITY: usize = 256;

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bounds of the file handle registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleCacheConfig {
    /// Maximum number of live handles. The least recently used handle is
    /// evicted (and cleaned up) beyond this.
    pub max_entries: u64,

    /// Evict handles not accessed for this long. `None` disables idle expiry.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Option<Duration>,
}

impl Default for HandleCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_HANDLES,
            idle_timeout: None,
        }
    }
}

impl HandleCacheConfig {
    #[must_use]
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

/// Configuration of the cached cloud filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Directory holding the local cache files, mirroring the file tree.
    pub cache_root: PathBuf,

    /// Quiescence period after the last write before a file is uploaded.
    ///
    /// Default: 5 seconds.
    #[serde(with = "humantime_serde")]
    pub next_update_timeout: Duration,

    /// Handle registry bounds.
    pub handles: HandleCacheConfig,

    /// Worker threads shared by uploads and slice deletions. Default: 4.
    pub upload_threads: usize,

    /// Jobs that may wait for a worker before submissions are rejected.
    pub upload_queue_capacity: usize,

    /// How long closing a handle waits for the final upload.
    ///
    /// `None` (default) hands the final upload to the worker pool and returns
    /// immediately; the pool drains its queue at shutdown.
    #[serde(with = "humantime_serde")]
    pub close_wait_timeout: Option<Duration>,

    /// Directory for upload/encryption spill files. `None` uses the system
    /// temp directory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir().join("seccloud-cache"),
            next_update_timeout: DEFAULT_NEXT_UPDATE_TIMEOUT,
            handles: HandleCacheConfig::default(),
            upload_threads: DEFAULT_UPLOAD_THREADS,
            upload_queue_capacity: DEFAULT_UPLOAD_QUEUE_CAPACITY,
            close_wait_timeout: None,
            spill_dir: None,
        }
    }
}

impl FsConfig {
    /// Default configuration with the cache under `cache_root`.
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            cache_root: cache_root.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_threads == 0 {
            return Err(ConfigError::Invalid("upload_threads must be at least 1".into()));
        }
        if self.upload_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "upload_queue_capacity must be at least 1".into(),
            ));
        }
        if self.handles.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "handles.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Sets the quiescence period before uploads.
    #[must_use]
    pub fn next_update_timeout(mut self, timeout: Duration) -> Self {
        self.next_update_timeout = timeout;
        self
    }

    /// Sets the handle registry bounds.
    #[must_use]
    pub fn handles(mut self, handles: HandleCacheConfig) -> Self {
        self.handles = handles;
        self
    }

    /// Sets the number of background worker threads.
    #[must_use]
    pub fn upload_threads(mut self, threads: usize) -> Self {
        self.upload_threads = threads;
        self
    }

    /// Sets the background queue capacity.
    #[must_use]
    pub fn upload_queue_capacity(mut self, capacity: usize) -> Self {
        self.upload_queue_capacity = capacity;
        self
    }

    /// Makes handle close wait up to `timeout` for the final upload.
    #[must_use]
    pub fn close_wait_timeout(mut self, timeout: Duration) -> Self {
        self.close_wait_timeout = Some(timeout);
        self
    }

    /// Sets the spill file directory.
    #[must_use]
    pub fn spill_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}
