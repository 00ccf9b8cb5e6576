//! Store decorator that encrypts content before it leaves the machine.
//!
//! [`EncryptingCloudStore`] wraps any [`CloudStore`] and owns the key
//! lifecycle of every content id passing through it:
//!
//! - **Upload**: a fresh [`ContentKey`] is generated, the plaintext is
//!   stream-encrypted into a local spill file, the key is persisted, and only
//!   then is the ciphertext handed to the underlying store.
//! - **Download**: the ciphertext is fetched into a spill file, the key is
//!   looked up, and the plaintext is streamed to the caller.
//!
//! The underlying store only ever sees ciphertext, and neither plaintext nor
//! key material is logged.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::crypto::{ContentKey, decrypt_stream, encrypt_stream};
use crate::error::{StoreError, StoreResult};
use crate::keys::{EncryptionKey, KeyRepository};
use crate::store::{CloudStore, ReadSeek};

/// What happens to a content key when its content is deleted remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyRetention {
    /// Keep the key. Delete is a pure pass-through to the underlying store.
    #[default]
    Retain,
    /// Remove the key once the remote delete succeeded.
    PurgeOnDelete,
}

/// A [`CloudStore`] that transparently encrypts uploads and decrypts downloads.
pub struct EncryptingCloudStore {
    underlying: Arc<dyn CloudStore>,
    keys: Arc<dyn KeyRepository>,
    retention: KeyRetention,
    spill_dir: Option<PathBuf>,
}

impl EncryptingCloudStore {
    /// Wrap `underlying`, persisting keys in `keys`.
    pub fn new(underlying: Arc<dyn CloudStore>, keys: Arc<dyn KeyRepository>) -> Self {
        Self {
            underlying,
            keys,
            retention: KeyRetention::default(),
            spill_dir: None,
        }
    }

    /// Set the key retention policy.
    #[must_use]
    pub fn with_retention(mut self, retention: KeyRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Create spill files in `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_spill_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.spill_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// The wrapped store.
    pub fn underlying(&self) -> &Arc<dyn CloudStore> {
        &self.underlying
    }

    /// The key retention policy in effect.
    pub fn retention(&self) -> KeyRetention {
        self.retention
    }

    /// Anonymous temp file; removed by the OS once the handle is dropped.
    fn spill(&self, data_id: &str) -> StoreResult<File> {
        let file = match &self.spill_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        };
        file.map_err(|e| self.io_error(data_id, e))
    }

    fn io_error(&self, data_id: &str, source: io::Error) -> StoreError {
        StoreError::io(data_id, self.underlying.name(), source)
    }
}

impl CloudStore for EncryptingCloudStore {
    fn name(&self) -> &str {
        self.underlying.name()
    }

    /// Encrypt `source` under a fresh key, save the key, then upload.
    ///
    /// The key is saved before the ciphertext leaves. If the underlying upload
    /// then fails, the saved key has already replaced the one for any older
    /// blob under `data_id`, and that blob stays undecryptable until a later
    /// upload succeeds.
    #[instrument(level = "debug", skip(self, source), fields(store = %self.underlying.name()))]
    fn upload(&self, data_id: &str, source: &mut dyn ReadSeek, length: u64) -> StoreResult<u64> {
        let mut spill = self.spill(data_id)?;
        let key = ContentKey::generate();

        let mut plaintext = (&mut *source).take(length);
        let ciphertext_len =
            encrypt_stream(&mut plaintext, &mut spill, &key).map_err(|source| {
                StoreError::Encryption {
                    data_id: data_id.to_string(),
                    source,
                }
            })?;
        if plaintext.limit() != 0 {
            let missing = plaintext.limit();
            return Err(self.io_error(
                data_id,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended {missing} bytes short of {length}"),
                ),
            ));
        }

        // The key must be durable before any ciphertext exists remotely.
        self.keys
            .save(EncryptionKey::new(data_id, key))
            .map_err(|source| StoreError::KeyRepository {
                data_id: data_id.to_string(),
                source,
            })?;

        spill
            .seek(SeekFrom::Start(0))
            .map_err(|e| self.io_error(data_id, e))?;
        let written = self.underlying.upload(data_id, &mut spill, ciphertext_len)?;

        debug!(
            plaintext_len = length,
            ciphertext_len, written, "Encrypted upload complete"
        );
        Ok(written)
    }

    #[instrument(level = "debug", skip(self, destination), fields(store = %self.underlying.name()))]
    fn download(&self, data_id: &str, destination: &mut dyn Write) -> StoreResult<u64> {
        let mut spill = self.spill(data_id)?;
        let read = self.underlying.download(data_id, &mut spill)?;
        spill
            .seek(SeekFrom::Start(0))
            .map_err(|e| self.io_error(data_id, e))?;

        let key = self
            .keys
            .find_by_data_id(data_id)
            .map_err(|source| StoreError::KeyRepository {
                data_id: data_id.to_string(),
                source,
            })?
            .ok_or_else(|| {
                warn!("No key stored for downloaded content");
                StoreError::MissingKey {
                    data_id: data_id.to_string(),
                }
            })?;

        let plaintext_len =
            decrypt_stream(&mut spill, destination, key.key()).map_err(|source| {
                StoreError::Decryption {
                    data_id: data_id.to_string(),
                    source,
                }
            })?;

        debug!(ciphertext_len = read, plaintext_len, "Decrypted download complete");
        Ok(read)
    }

    #[instrument(level = "debug", skip(self), fields(store = %self.underlying.name()))]
    fn delete(&self, data_id: &str) -> StoreResult<()> {
        self.underlying.delete(data_id)?;

        if self.retention == KeyRetention::PurgeOnDelete {
            // The content is gone either way; a leftover key only costs space.
            match self.keys.delete(data_id) {
                Ok(existed) => debug!(existed, "Content key purged"),
                Err(e) => warn!(error = %e, "Failed to purge content key"),
            }
        }
        Ok(())
    }

    fn total_space(&self) -> StoreResult<u64> {
        self.underlying.total_space()
    }

    fn available_space(&self) -> StoreResult<u64> {
        self.underlying.available_space()
    }
}

impl std::fmt::Debug for EncryptingCloudStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptingCloudStore")
            .field("underlying", &self.underlying.name())
            .field("retention", &self.retention)
            .field("spill_dir", &self.spill_dir)
            .finish_non_exhaustive()
    }
}
