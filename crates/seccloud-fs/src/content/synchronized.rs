use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::FileContent;

/// Serializes every operation on the wrapped channel through the file's
/// content lock.
///
/// The same lock is taken by the uploader while it snapshots the cache file,
/// so an upload never observes a half-applied write.
pub struct SynchronizedContent {
    inner: Box<dyn FileContent>,
    lock: Arc<Mutex<()>>,
}

impl SynchronizedContent {
    pub fn new(inner: Box<dyn FileContent>, lock: Arc<Mutex<()>>) -> Self {
        Self { inner, lock }
    }
}

impl FileContent for SynchronizedContent {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let _guard = self.lock.lock();
        self.inner.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let _guard = self.lock.lock();
        self.inner.write_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        let _guard = self.lock.lock();
        self.inner.size()
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        let _guard = self.lock.lock();
        self.inner.truncate(size)
    }

    fn sync(&self) -> io::Result<()> {
        let _guard = self.lock.lock();
        self.inner.sync()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> io::Result<()> {
        let _guard = self.lock.lock();
        self.inner.close()
    }

    // Hold the lock across the whole loop so a multi-call write is atomic.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let _guard = self.lock.lock();
        self.inner.write_all_at(buf, offset)
    }

    fn read_to_vec(&self) -> io::Result<Vec<u8>> {
        let _guard = self.lock.lock();
        self.inner.read_to_vec()
    }
}

impl fmt::Debug for SynchronizedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedContent")
            .field("inner", &self.inner)
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}
