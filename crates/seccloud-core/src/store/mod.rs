//! The cloud store contract and the stores shipped with the core.
//!
//! A [`CloudStore`] is a named remote backend addressed by opaque content ids.
//! Stores are untrusted: anything they hold should arrive through an
//! [`EncryptingCloudStore`](crate::EncryptingCloudStore).

mod local;
mod registry;

use std::io::{Read, Seek, Write};

use crate::error::StoreResult;

pub use local::LocalDirCloudStore;
pub use registry::{CloudStoreRegistrar, CloudStoreRegistry, LocalDirRegistrar};

/// A seekable byte source handed to [`CloudStore::upload`].
///
/// Implemented for every `Read + Seek` type, so files, cursors and spill
/// files all qualify.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// A named remote content store.
///
/// All operations are blocking and may be slow; callers on latency-sensitive
/// paths run them on a [`WorkerPool`](crate::WorkerPool). Transport and
/// backend failures surface as [`StoreError`](crate::StoreError).
pub trait CloudStore: Send + Sync {
    /// Stable, unique name of this store (e.g. `local:///srv/blobs`).
    fn name(&self) -> &str;

    /// Store the first `length` bytes of `source` under `data_id`, replacing any
    /// previous content. Returns the number of bytes stored.
    fn upload(&self, data_id: &str, source: &mut dyn ReadSeek, length: u64) -> StoreResult<u64>;

    /// Write the content stored under `data_id` to `destination`. Returns the
    /// number of bytes read from the store.
    fn download(&self, data_id: &str, destination: &mut dyn Write) -> StoreResult<u64>;

    /// Remove the content stored under `data_id`.
    fn delete(&self, data_id: &str) -> StoreResult<()>;

    /// Total capacity of the store in bytes.
    fn total_space(&self) -> StoreResult<u64>;

    /// Remaining capacity of the store in bytes.
    fn available_space(&self) -> StoreResult<u64>;
}
