//! Store that keeps blobs as files in a local directory.
//!
//! Used for the CLI, for tests, and as a stand-in for a mounted network share.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::{CloudStore, ReadSeek};
use crate::error::{StoreError, StoreResult};

/// Name prefix of directory-backed stores.
pub const LOCAL_SCHEME: &str = "local://";

/// Encoded ids longer than this are stored under a hashed name.
pub const SHORTENING_THRESHOLD: usize = 220;

/// Suffix marking a hashed file name. `.` is outside the base64url alphabet.
const SHORTENED_SUFFIX: &str = ".sha";

/// A [`CloudStore`] writing each content id to one file under `root`.
///
/// File names are the URL-safe base64 encoding of the content id, so any id
/// (including ones containing `/`) maps to a single flat file. Encodings
/// longer than [`SHORTENING_THRESHOLD`] are replaced by the base64url SHA-256
/// of the id plus a `.sha` suffix, keeping names under `NAME_MAX`. Uploads are
/// written to a temporary file in the same directory and renamed into place,
/// so readers never observe a partial blob.
#[derive(Debug)]
pub struct LocalDirCloudStore {
    name: String,
    root: PathBuf,
}

impl LocalDirCloudStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        let name = format!("{LOCAL_SCHEME}{}", root.display());
        debug!(store = %name, "Local directory store opened");
        Ok(Self { name, root })
    }

    /// Directory holding the blobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether content is stored under `data_id`.
    pub fn contains(&self, data_id: &str) -> bool {
        self.blob_path(data_id).is_file()
    }

    fn blob_path(&self, data_id: &str) -> PathBuf {
        self.root.join(blob_name(data_id))
    }

    fn io_error(&self, data_id: &str, source: io::Error) -> StoreError {
        StoreError::io(data_id, &self.name, source)
    }
}

fn blob_name(data_id: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(data_id);
    if encoded.len() <= SHORTENING_THRESHOLD {
        return encoded;
    }
    let digest = Sha256::digest(data_id.as_bytes());
    format!("{}{SHORTENED_SUFFIX}", URL_SAFE_NO_PAD.encode(digest))
}

impl CloudStore for LocalDirCloudStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip(self, source), fields(store = %self.name))]
    fn upload(&self, data_id: &str, source: &mut dyn ReadSeek, length: u64) -> StoreResult<u64> {
        let mut tmp =
            tempfile::NamedTempFile::new_in(&self.root).map_err(|e| self.io_error(data_id, e))?;

        let mut limited = (&mut *source).take(length);
        let copied = io::copy(&mut limited, &mut tmp).map_err(|e| self.io_error(data_id, e))?;
        if copied != length {
            return Err(self.io_error(
                data_id,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended after {copied} of {length} bytes"),
                ),
            ));
        }

        tmp.flush().map_err(|e| self.io_error(data_id, e))?;
        tmp.persist(self.blob_path(data_id))
            .map_err(|e| self.io_error(data_id, e.error))?;

        debug!(bytes = copied, "Blob stored");
        Ok(copied)
    }

    #[instrument(level = "debug", skip(self, destination), fields(store = %self.name))]
    fn download(&self, data_id: &str, destination: &mut dyn Write) -> StoreResult<u64> {
        let mut file = match File::open(self.blob_path(data_id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    data_id: data_id.to_string(),
                    store: self.name.clone(),
                });
            }
            Err(e) => return Err(self.io_error(data_id, e)),
        };

        let copied = io::copy(&mut file, destination).map_err(|e| self.io_error(data_id, e))?;
        debug!(bytes = copied, "Blob read");
        Ok(copied)
    }

    #[instrument(level = "debug", skip(self), fields(store = %self.name))]
    fn delete(&self, data_id: &str) -> StoreResult<()> {
        match fs::remove_file(self.blob_path(data_id)) {
            Ok(()) => Ok(()),
            // Deleting an absent blob is a no-op, so retries are harmless.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Blob already absent");
                Ok(())
            }
            Err(e) => Err(self.io_error(data_id, e)),
        }
    }

    fn total_space(&self) -> StoreResult<u64> {
        fs2::total_space(&self.root).map_err(|e| self.io_error("", e))
    }

    fn available_space(&self) -> StoreResult<u64> {
        fs2::available_space(&self.root).map_err(|e| self.io_error("", e))
    }
}
