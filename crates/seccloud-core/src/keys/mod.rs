//! Content key persistence.
//!
//! Every content id uploaded through the
//! [`EncryptingCloudStore`](crate::EncryptingCloudStore) has exactly one
//! stored key. Keys are looked up by content id on every download.

mod json;

use std::fmt;
use std::io;

use dashmap::DashMap;
use thiserror::Error;

use crate::crypto::{ContentKey, CryptoError};

pub use json::JsonKeyRepository;

/// Association of a content id to the key that encrypted its remote copy.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    data_id: String,
    key: ContentKey,
}

impl EncryptionKey {
    /// Create a new key association.
    pub fn new(data_id: impl Into<String>, key: ContentKey) -> Self {
        Self {
            data_id: data_id.into(),
            key,
        }
    }

    /// The content id this key protects.
    pub fn data_id(&self) -> &str {
        &self.data_id
    }

    /// The key itself.
    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Consume the association and return the key.
    pub fn into_key(self) -> ContentKey {
        self.key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("data_id", &self.data_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Errors raised by key repositories.
#[derive(Error, Debug)]
pub enum KeyRepositoryError {
    /// The backing storage could not be read or written.
    #[error("key storage I/O failed: {0}")]
    Io(#[from] io::Error),

    /// The backing storage holds data that cannot be parsed.
    #[error("key storage is corrupt: {0}")]
    Corrupt(String),

    /// A stored key has invalid material.
    #[error("stored key for '{data_id}' is invalid: {source}")]
    InvalidKey {
        data_id: String,
        #[source]
        source: CryptoError,
    },
}

impl KeyRepositoryError {
    /// Whether the failure may clear up on its own (e.g. a busy disk).
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyRepositoryError::Io(_))
    }
}

/// Persistence contract for content keys.
///
/// Implementations must be safe to share across all open files; every call is
/// a short, self-contained operation.
pub trait KeyRepository: Send + Sync {
    /// Look up the key stored for `data_id`.
    fn find_by_data_id(&self, data_id: &str) -> Result<Option<EncryptionKey>, KeyRepositoryError>;

    /// Store `key`, replacing any previous key for the same content id.
    fn save(&self, key: EncryptionKey) -> Result<(), KeyRepositoryError>;

    /// Remove the key for `data_id`. Returns whether a key existed.
    fn delete(&self, data_id: &str) -> Result<bool, KeyRepositoryError>;
}

/// In-process key repository backed by `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryKeyRepository {
    keys: DashMap<String, ContentKey>,
}

impl MemoryKeyRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a key is stored for `data_id`.
    pub fn contains(&self, data_id: &str) -> bool {
        self.keys.contains_key(data_id)
    }
}

impl KeyRepository for MemoryKeyRepository {
    fn find_by_data_id(&self, data_id: &str) -> Result<Option<EncryptionKey>, KeyRepositoryError> {
        Ok(self
            .keys
            .get(data_id)
            .map(|key| EncryptionKey::new(data_id, key.clone())))
    }

    fn save(&self, key: EncryptionKey) -> Result<(), KeyRepositoryError> {
        let EncryptionKey { data_id, key } = key;
        self.keys.insert(data_id, key);
        Ok(())
    }

    fn delete(&self, data_id: &str) -> Result<bool, KeyRepositoryError> {
        Ok(self.keys.remove(data_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_find() {
        let repo = MemoryKeyRepository::new();
        let key = ContentKey::generate();

        assert!(repo.find_by_data_id("a").unwrap().is_none());

        repo.save(EncryptionKey::new("a", key.clone())).unwrap();
        let found = repo.find_by_data_id("a").unwrap().expect("key stored");
        assert_eq!(found.data_id(), "a");
        assert_eq!(found.key(), &key);
    }

    #[test]
    fn test_save_overwrites() {
        let repo = MemoryKeyRepository::new();
        let first = ContentKey::generate();
        let second = ContentKey::generate();

        repo.save(EncryptionKey::new("a", first)).unwrap();
        repo.save(EncryptionKey::new("a", second.clone())).unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.find_by_data_id("a").unwrap().unwrap().key(), &second);
    }

    #[test]
    fn test_delete() {
        let repo = MemoryKeyRepository::new();
        repo.save(EncryptionKey::new("a", ContentKey::generate()))
            .unwrap();

        assert!(repo.delete("a").unwrap());
        assert!(!repo.delete("a").unwrap());
        assert!(repo.is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EncryptionKey::new("a", ContentKey::generate());
        assert!(format!("{key:?}").contains("[REDACTED]"));
    }
}
