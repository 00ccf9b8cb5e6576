//! In-memory cloud store for tests.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::store::{CloudStore, ReadSeek};

/// Capacity reported by a [`MemoryCloudStore`] unless overridden.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 1 << 30;

/// A [`CloudStore`] holding blobs in a `HashMap`.
///
/// Beyond plain storage it can inject failures per operation, delay uploads
/// to widen race windows, and record how many uploads overlapped.
#[derive(Debug)]
pub struct MemoryCloudStore {
    name: String,
    capacity: u64,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    upload_latency: Mutex<Duration>,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    fail_deletes: AtomicBool,
    uploads: AtomicU64,
    downloads: AtomicU64,
    deletes: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryCloudStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_MEMORY_CAPACITY,
            blobs: RwLock::new(HashMap::new()),
            upload_latency: Mutex::new(Duration::ZERO),
            fail_uploads: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Report `capacity` bytes as the total space.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Stored bytes for `data_id`, if any.
    pub fn blob(&self, data_id: &str) -> Option<Vec<u8>> {
        self.blobs.read().get(data_id).cloned()
    }

    /// Store `bytes` directly, bypassing counters and failure injection.
    pub fn put_blob(&self, data_id: impl Into<String>, bytes: Vec<u8>) {
        self.blobs.write().insert(data_id.into(), bytes);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Make every following upload fail (or succeed again).
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every upload, after the source has been read.
    pub fn set_upload_latency(&self, latency: Duration) {
        *self.upload_latency.lock() = latency;
    }

    /// Upload calls received, including failed ones.
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Highest number of uploads that were running at the same time.
    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn injected(&self, data_id: &str, operation: &str) -> StoreError {
        StoreError::Backend {
            data_id: data_id.to_string(),
            store: self.name.clone(),
            message: format!("injected {operation} failure"),
        }
    }

    fn used(&self) -> u64 {
        self.blobs.read().values().map(|b| b.len() as u64).sum()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CloudStore for MemoryCloudStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload(&self, data_id: &str, source: &mut dyn ReadSeek, length: u64) -> StoreResult<u64> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let mut bytes = Vec::new();
        (&mut *source)
            .take(length)
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::io(data_id, &self.name, e))?;

        let latency = *self.upload_latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(self.injected(data_id, "upload"));
        }
        if bytes.len() as u64 != length {
            return Err(StoreError::io(
                data_id,
                &self.name,
                io::Error::new(io::ErrorKind::UnexpectedEof, "source shorter than length"),
            ));
        }

        trace!(store = %self.name, data_id, bytes = length, "Memory upload");
        self.blobs.write().insert(data_id.to_string(), bytes);
        Ok(length)
    }

    fn download(&self, data_id: &str, destination: &mut dyn Write) -> StoreResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(self.injected(data_id, "download"));
        }
        let bytes = self.blob(data_id).ok_or_else(|| StoreError::NotFound {
            data_id: data_id.to_string(),
            store: self.name.clone(),
        })?;
        destination
            .write_all(&bytes)
            .map_err(|e| StoreError::io(data_id, &self.name, e))?;
        Ok(bytes.len() as u64)
    }

    fn delete(&self, data_id: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(self.injected(data_id, "delete"));
        }
        self.blobs.write().remove(data_id);
        Ok(())
    }

    fn total_space(&self) -> StoreResult<u64> {
        Ok(self.capacity)
    }

    fn available_space(&self) -> StoreResult<u64> {
        Ok(self.capacity.saturating_sub(self.used()))
    }
}
