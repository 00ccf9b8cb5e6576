use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use tracing::debug;

use super::FileContent;
use crate::metadata::SharedMetadata;
use crate::uploader::FileUploader;

/// Keeps metadata timestamps current and tells the uploader about changes.
///
/// Closing the channel expedites any pending upload so the final content is
/// handed to the worker pool instead of waiting out the quiescence period.
#[derive(Debug)]
pub struct UploadingContent {
    inner: Box<dyn FileContent>,
    metadata: SharedMetadata,
    uploader: Arc<FileUploader>,
    closed: AtomicBool,
}

impl UploadingContent {
    pub fn new(
        inner: Box<dyn FileContent>,
        metadata: SharedMetadata,
        uploader: Arc<FileUploader>,
    ) -> Self {
        Self {
            inner,
            metadata,
            uploader,
            closed: AtomicBool::new(false),
        }
    }

    fn touch_modified(&self) {
        self.metadata.write().set_last_modified(SystemTime::now());
        self.uploader.content_changed();
    }
}

impl FileContent for UploadingContent {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let n = self.inner.read_at(buf, offset)?;
        self.metadata.write().set_last_access(SystemTime::now());
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let n = self.inner.write_at(buf, offset)?;
        if n > 0 {
            self.touch_modified();
        }
        Ok(n)
    }

    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.inner.truncate(size)?;
        self.touch_modified();
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.sync()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.inner.close();
        if self.uploader.is_dirty() {
            debug!(data_id = %self.uploader.data_id(), "Expediting upload on close");
        }
        self.uploader.flush();
        result
    }
}
