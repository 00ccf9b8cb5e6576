//! Storage core for seccloud: the remote side of the cloud-backed filesystem.
//!
//! # Components
//!
//! - [`CloudStore`] - contract for a named remote content store
//! - [`EncryptingCloudStore`] - decorator that keeps every store ciphertext-only
//! - [`KeyRepository`] - per-content-id key persistence
//! - [`WorkerPool`] - shared background pool for uploads and deletions
//! - [`DeleteTask`] - failure-isolated removal of one slice from one store
//! - [`CloudStoreRegistry`] - named stores available to the filesystem
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//! use std::sync::Arc;
//! use seccloud_core::{CloudStore, EncryptingCloudStore, MemoryKeyRepository};
//! use seccloud_core::testing::MemoryCloudStore;
//!
//! let remote = Arc::new(MemoryCloudStore::new("mem://example"));
//! let keys = Arc::new(MemoryKeyRepository::new());
//! let store = EncryptingCloudStore::new(remote.clone(), keys);
//!
//! let mut src = Cursor::new(b"hello".to_vec());
//! store.upload("greeting", &mut src, 5).unwrap();
//! assert_ne!(remote.blob("greeting").unwrap(), b"hello");
//!
//! let mut out = Vec::new();
//! store.download("greeting", &mut out).unwrap();
//! assert_eq!(out, b"hello");
//! ```

pub mod crypto;
pub mod encrypting;
pub mod error;
pub mod keys;
pub mod pool;
pub mod slice;
pub mod store;
pub mod testing;

pub use crypto::{ContentKey, CryptoError};
pub use encrypting::{EncryptingCloudStore, KeyRetention};
pub use error::{StoreError, StoreResult};
pub use keys::{
    EncryptionKey, JsonKeyRepository, KeyRepository, KeyRepositoryError, MemoryKeyRepository,
};
pub use pool::{PoolConfig, PoolStats, SubmitError, WorkerPool};
pub use slice::{delete_slices, DeleteTask, DeletionReport, SliceMetadata};
pub use store::{
    CloudStore, CloudStoreRegistrar, CloudStoreRegistry, LocalDirCloudStore, LocalDirRegistrar,
    ReadSeek,
};
