//! Cached, cloud-synchronized files for seccloud.
//!
//! This crate sits between a kernel filesystem bridge and the stores of
//! [`seccloud_core`]. Reads and writes hit a local cache file; changed files
//! are uploaded in the background once they stop changing.
//!
//! # Main types
//!
//! - [`FileHandleRegistry`] - bounded map of open handles, cleaned up on
//!   eviction or explicit destroy
//! - [`CloudFile`] / [`CloudFileFactory`] - a file's metadata, cache file and
//!   uploader
//! - [`FileUploader`] - per-file debounce state machine
//! - [`FsConfig`] - tuning loaded from JSON
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use seccloud_core::{EncryptingCloudStore, LocalDirCloudStore, MemoryKeyRepository};
//! use seccloud_fs::{
//!     CloudFileFactory, FileHandle, FileHandleRegistry, FileMetadata, FsConfig,
//!     MemoryMetadataRepository,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let remote = Arc::new(LocalDirCloudStore::open("/srv/blobs")?);
//! let store = Arc::new(EncryptingCloudStore::new(remote, Arc::new(MemoryKeyRepository::new())));
//! let config = FsConfig::new("/var/cache/seccloud");
//! let factory = CloudFileFactory::new(config.clone(), store, Arc::new(MemoryMetadataRepository::new()))?;
//! let handles = FileHandleRegistry::new(&config.handles);
//!
//! let file = factory.open(FileMetadata::file("/notes.txt").into_shared())?;
//! file.create_content()?;
//! let id = handles.register(FileHandle::open(file)?);
//! handles.get(id).unwrap().content().write_all_at(b"hello", 0)?;
//! handles.destroy(id);
//!
//! factory.shutdown(Duration::from_secs(30));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod file;
pub mod handles;
pub mod metadata;
pub mod uploader;

pub use config::{ConfigError, FsConfig, HandleCacheConfig};
pub use content::FileContent;
pub use error::{FsError, FsResult};
pub use file::{CloudFile, CloudFileFactory};
pub use handles::{FileHandle, FileHandleRegistry};
pub use metadata::{
    FileMetadata, MemoryMetadataRepository, MetadataRepository, SharedMetadata, data_id_for,
};
pub use uploader::{FileUploader, UploadContext, UploadScheduler, UploadStats};
