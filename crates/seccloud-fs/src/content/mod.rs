//! Content channels over the local cache file.
//!
//! An open file's content is reached through a stack of narrow decorators,
//! built once per [`CloudFile::content`](crate::CloudFile::content) call:
//!
//! ```text
//! SynchronizedContent      one lock per file: no interleaved partial writes,
//!   └─ UploadingContent    timestamps + change notification to the uploader
//!        └─ CachedContent  positional I/O on the cache file
//! ```

mod local;
mod synchronized;
mod uploading;

use std::fmt;
use std::io;

pub use local::CachedContent;
pub use synchronized::SynchronizedContent;
pub use uploading::UploadingContent;

/// Positional byte channel over a file's content.
///
/// Methods take `&self` so a channel can be shared between threads; a closed
/// channel fails every operation with `EBADF`.
pub trait FileContent: Send + Sync + fmt::Debug {
    /// Read into `buf` starting at `offset`. Returns 0 at end of content.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `buf` at `offset`, extending the content if needed.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Current content length.
    fn size(&self) -> io::Result<u64>;

    /// Shrink or extend the content to `size` bytes.
    fn truncate(&self, size: u64) -> io::Result<()>;

    /// Flush written bytes to local durable storage.
    fn sync(&self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Close the channel. Closing twice is a no-op.
    fn close(&self) -> io::Result<()>;

    /// Write all of `buf` at `offset`.
    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write_at(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ));
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read the whole content from offset 0.
    fn read_to_vec(&self) -> io::Result<Vec<u8>> {
        let size = usize::try_from(self.size()?)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "content too large"))?;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(&mut buf[filled..], filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Error returned by operations on a closed channel.
pub(crate) fn closed_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}
