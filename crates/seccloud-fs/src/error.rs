//! Error handling and errno mapping for the filesystem layer.
//!
//! Foreground operations (open, read, write) return [`FsError`]; the kernel
//! bridge converts it with [`FsError::to_errno`]. Background failures (uploads,
//! eviction cleanup) are logged where they happen and never reach this type.

use std::io;

use seccloud_core::{StoreError, SubmitError};
use thiserror::Error;

use crate::config::ConfigError;

/// Filesystem errors surfaced to the kernel bridge.
#[derive(Debug, Error)]
pub enum FsError {
    /// The local cache file for `path` is missing or inaccessible.
    ///
    /// Not retryable for the handle being opened.
    #[error("cannot open cached content of '{path}': {source}")]
    ContentOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Store operation failed (boxed to reduce enum size).
    #[error("store operation failed: {0}")]
    Store(Box<StoreError>),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Path is not absolute or escapes the cache root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid file handle.
    #[error("invalid file handle: {0}")]
    InvalidHandle(u64),

    /// Background machinery could not accept work.
    #[error("background pool unavailable: {0}")]
    Pool(#[from] SubmitError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FsError {
    /// Converts this error to a libc error code for the kernel bridge.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::ContentOpen { source, .. } | FsError::Io(source) => io_error_to_errno(source),
            FsError::Store(e) => store_error_to_errno(e),
            FsError::InvalidPath(_) | FsError::Config(_) => libc::EINVAL,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::Pool(SubmitError::QueueFull { .. }) => libc::EAGAIN,
            FsError::Pool(SubmitError::Shutdown) => libc::ESHUTDOWN,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(e: StoreError) -> Self {
        FsError::Store(Box::new(e))
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Maps an I/O error to errno, falling back to `EIO`.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }
    match e.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::TimedOut => libc::ETIMEDOUT,
        io::ErrorKind::WouldBlock => libc::EAGAIN,
        _ => libc::EIO,
    }
}

/// Maps a store error to errno.
///
/// Lost keys and corrupted ciphertext become `EIO`; the data cannot be read.
pub fn store_error_to_errno(e: &StoreError) -> i32 {
    match e {
        StoreError::NotFound { .. } => libc::ENOENT,
        StoreError::Io { source, .. } => io_error_to_errno(source),
        StoreError::Backend { .. }
        | StoreError::Encryption { .. }
        | StoreError::Decryption { .. }
        | StoreError::MissingKey { .. }
        | StoreError::KeyRepository { .. } => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_open_keeps_os_errno() {
        let err = FsError::ContentOpen {
            path: "/a/b.txt".to_string(),
            source: io::Error::from_raw_os_error(libc::ENOENT),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
        assert!(err.to_string().contains("/a/b.txt"));
    }

    #[test]
    fn test_io_error_mapping_without_os_error() {
        let e = io::Error::other("custom error");
        assert_eq!(io_error_to_errno(&e), libc::EIO);
        let e = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error_to_errno(&e), libc::ENOENT);
    }

    #[test]
    fn test_store_error_mapping() {
        let missing: FsError = StoreError::MissingKey {
            data_id: "x".to_string(),
        }
        .into();
        assert_eq!(missing.to_errno(), libc::EIO);

        let not_found: FsError = StoreError::NotFound {
            data_id: "x".to_string(),
            store: "mem://a".to_string(),
        }
        .into();
        assert_eq!(not_found.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_handle_and_pool_mapping() {
        assert_eq!(FsError::InvalidHandle(7).to_errno(), libc::EBADF);
        assert_eq!(
            FsError::Pool(SubmitError::QueueFull { capacity: 1 }).to_errno(),
            libc::EAGAIN
        );
    }
}
