use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use parking_lot::RwLock;

use super::{FileContent, closed_error};

/// Raw channel over an open cache file.
#[derive(Debug)]
pub struct CachedContent {
    file: RwLock<Option<File>>,
}

impl CachedContent {
    pub fn new(file: File) -> Self {
        Self {
            file: RwLock::new(Some(file)),
        }
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> io::Result<T>) -> io::Result<T> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(closed_error)?;
        op(file)
    }
}

impl FileContent for CachedContent {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.with_file(|f| f.read_at(buf, offset))
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.with_file(|f| f.write_at(buf, offset))
    }

    fn size(&self) -> io::Result<u64> {
        self.with_file(|f| Ok(f.metadata()?.len()))
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.with_file(|f| f.set_len(size))
    }

    fn sync(&self) -> io::Result<()> {
        self.with_file(File::sync_data)
    }

    fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    fn close(&self) -> io::Result<()> {
        match self.file.write().take() {
            // Surface write-back errors before the descriptor is dropped.
            Some(file) => file.sync_data(),
            None => Ok(()),
        }
    }
}
