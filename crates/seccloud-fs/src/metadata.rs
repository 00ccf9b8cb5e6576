//! File metadata and its persistence contract.
//!
//! A [`FileMetadata`] is owned by the metadata repository. While a file is
//! open, one shared instance ([`SharedMetadata`]) is referenced by the cloud
//! file and every handle; timestamp updates are visible to all of them.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata shared between a cloud file and its handles.
pub type SharedMetadata = Arc<RwLock<FileMetadata>>;

/// Metadata of one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    path: String,
    parent: String,
    directory: bool,
    #[serde(with = "humantime_serde")]
    last_access: SystemTime,
    #[serde(with = "humantime_serde")]
    last_modified: SystemTime,
    data_id: String,
}

impl FileMetadata {
    /// Metadata for a new regular file at `path`.
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path.into(), false)
    }

    /// Metadata for a new directory at `path`.
    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path.into(), true)
    }

    fn new(path: String, directory: bool) -> Self {
        let now = SystemTime::now();
        Self {
            parent: parent_of(&path).to_string(),
            data_id: data_id_for(&path),
            path,
            directory,
            last_access: now,
            last_modified: now,
        }
    }

    /// Wrap into the shared form used by open files.
    pub fn into_shared(self) -> SharedMetadata {
        Arc::new(RwLock::new(self))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    pub fn last_access(&self) -> SystemTime {
        self.last_access
    }

    pub fn set_last_access(&mut self, time: SystemTime) {
        self.last_access = time;
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    pub fn set_last_modified(&mut self, time: SystemTime) {
        self.last_modified = time;
    }

    /// Remote content id: lowercase hex SHA-256 of the path.
    pub fn data_id(&self) -> &str {
        &self.data_id
    }
}

/// Remote content id derived from a file path.
pub fn data_id_for(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Persistence of file metadata.
pub trait MetadataRepository: Send + Sync {
    /// Store a snapshot of `metadata`, replacing the previous one for its path.
    fn save(&self, metadata: &FileMetadata) -> io::Result<()>;

    /// Load the metadata stored for `path`.
    fn find(&self, path: &str) -> io::Result<Option<FileMetadata>>;
}

/// Metadata repository kept in memory.
#[derive(Debug, Default)]
pub struct MemoryMetadataRepository {
    entries: DashMap<String, FileMetadata>,
    saves: AtomicU64,
}

impl MemoryMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl MetadataRepository for MemoryMetadataRepository {
    fn save(&self, metadata: &FileMetadata) -> io::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.entries
            .insert(metadata.path().to_string(), metadata.clone());
        Ok(())
    }

    fn find(&self, path: &str) -> io::Result<Option<FileMetadata>> {
        Ok(self.entries.get(path).map(|e| e.value().clone()))
    }
}
