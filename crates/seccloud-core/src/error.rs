//! Error types for cloud store operations.
//!
//! Every failure at the store boundary is an I/O-class error: it carries the
//! content id it concerns and preserves the original cause. Callers at the
//! kernel-bridge boundary can convert it into [`io::Error`].

use std::io;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::keys::KeyRepositoryError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`CloudStore`](crate::CloudStore) implementations and
/// the [`EncryptingCloudStore`](crate::EncryptingCloudStore) decorator.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Local or transport I/O failed while handling `data_id`.
    #[error("I/O error on data '{data_id}' in [{store}]: {source}")]
    Io {
        data_id: String,
        store: String,
        #[source]
        source: io::Error,
    },

    /// The remote backend rejected or failed the operation.
    #[error("backend [{store}] failed on data '{data_id}': {message}")]
    Backend {
        data_id: String,
        store: String,
        message: String,
    },

    /// The remote store has no content under this id.
    #[error("data '{data_id}' not found in [{store}]")]
    NotFound { data_id: String, store: String },

    /// Plaintext could not be encrypted.
    #[error("failed to encrypt data '{data_id}': {source}")]
    Encryption {
        data_id: String,
        #[source]
        source: CryptoError,
    },

    /// Downloaded ciphertext could not be decrypted.
    #[error("failed to decrypt data '{data_id}': {source}")]
    Decryption {
        data_id: String,
        #[source]
        source: CryptoError,
    },

    /// No key was ever stored for this id: the content is unrecoverable.
    #[error("no encryption key found for data ID '{data_id}'")]
    MissingKey { data_id: String },

    /// The key repository failed while reading or writing the key of `data_id`.
    #[error("key repository failed for data '{data_id}': {source}")]
    KeyRepository {
        data_id: String,
        #[source]
        source: KeyRepositoryError,
    },
}

impl StoreError {
    /// Build an I/O error with its context.
    pub fn io(data_id: impl Into<String>, store: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io {
            data_id: data_id.into(),
            store: store.into(),
            source,
        }
    }

    /// The content id this error concerns.
    pub fn data_id(&self) -> &str {
        match self {
            StoreError::Io { data_id, .. }
            | StoreError::Backend { data_id, .. }
            | StoreError::NotFound { data_id, .. }
            | StoreError::Encryption { data_id, .. }
            | StoreError::Decryption { data_id, .. }
            | StoreError::MissingKey { data_id }
            | StoreError::KeyRepository { data_id, .. } => data_id,
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// A missing key or ciphertext that fails to decrypt signals lost or
    /// corrupted data, never a transient condition.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Io { .. } | StoreError::Backend { .. } => true,
            StoreError::KeyRepository { source, .. } => source.is_transient(),
            StoreError::NotFound { .. }
            | StoreError::Encryption { .. }
            | StoreError::Decryption { .. }
            | StoreError::MissingKey { .. } => false,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            StoreError::Io { source, .. } => source.kind(),
            StoreError::NotFound { .. } => io::ErrorKind::NotFound,
            StoreError::Decryption { .. } | StoreError::MissingKey { .. } => {
                io::ErrorKind::InvalidData
            }
            StoreError::Backend { .. }
            | StoreError::Encryption { .. }
            | StoreError::KeyRepository { .. } => io::ErrorKind::Other,
        }
    }
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}
