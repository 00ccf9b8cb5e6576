//! Key repository persisted as a JSON document.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::{EncryptionKey, KeyRepository, KeyRepositoryError};
use crate::crypto::ContentKey;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyFile {
    version: u32,
    /// data_id -> base64 key
    keys: BTreeMap<String, String>,
}

/// Key repository stored in a single JSON file.
///
/// The whole document is held in memory and rewritten atomically (temp file in
/// the same directory, then rename) on every change. Suitable for the CLI and
/// single-node deployments; the file must be protected like any key store.
#[derive(Debug)]
pub struct JsonKeyRepository {
    path: PathBuf,
    keys: RwLock<BTreeMap<String, String>>,
}

impl JsonKeyRepository {
    /// Open the repository at `path`, starting empty if the file does not exist.
    #[instrument(level = "debug", fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KeyRepositoryError> {
        let path = path.as_ref().to_path_buf();
        let keys = match fs::read(&path) {
            Ok(bytes) => {
                let file: KeyFile = serde_json::from_slice(&bytes)
                    .map_err(|e| KeyRepositoryError::Corrupt(e.to_string()))?;
                if file.version != FORMAT_VERSION {
                    return Err(KeyRepositoryError::Corrupt(format!(
                        "unsupported key file version {}",
                        file.version
                    )));
                }
                file.keys
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(entries = keys.len(), "Key repository opened");
        Ok(Self {
            path,
            keys: RwLock::new(keys),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    fn persist(&self, keys: &BTreeMap<String, String>) -> Result<(), KeyRepositoryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let document = KeyFile {
            version: FORMAT_VERSION,
            keys: keys.clone(),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &document)
            .map_err(|e| KeyRepositoryError::Corrupt(e.to_string()))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl KeyRepository for JsonKeyRepository {
    fn find_by_data_id(&self, data_id: &str) -> Result<Option<EncryptionKey>, KeyRepositoryError> {
        let keys = self.keys.read();
        let Some(encoded) = keys.get(data_id) else {
            return Ok(None);
        };
        let raw = Zeroizing::new(STANDARD.decode(encoded).map_err(|e| {
            KeyRepositoryError::Corrupt(format!("key for '{data_id}' is not base64: {e}"))
        })?);
        let key = ContentKey::from_bytes(&raw).map_err(|source| KeyRepositoryError::InvalidKey {
            data_id: data_id.to_string(),
            source,
        })?;
        Ok(Some(EncryptionKey::new(data_id, key)))
    }

    fn save(&self, key: EncryptionKey) -> Result<(), KeyRepositoryError> {
        let mut keys = self.keys.write();
        let previous = keys.insert(
            key.data_id().to_string(),
            STANDARD.encode(key.key().expose()),
        );
        if let Err(e) = self.persist(&keys) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => keys.insert(key.data_id().to_string(), old),
                None => keys.remove(key.data_id()),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, data_id: &str) -> Result<bool, KeyRepositoryError> {
        let mut keys = self.keys.write();
        let Some(previous) = keys.remove(data_id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&keys) {
            keys.insert(data_id.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }
}
