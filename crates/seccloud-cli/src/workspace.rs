//! On-disk layout the CLI works against.
//!
//! ```text
//! <root>/
//!   keys.json        content keys
//!   stores/<name>/   one local-directory store per sub-directory
//!   cache/           local cache of the file layer
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use seccloud_core::{
    CloudStore, CloudStoreRegistry, EncryptingCloudStore, JsonKeyRepository, KeyRetention,
    LocalDirCloudStore, LocalDirRegistrar,
};
use seccloud_fs::FsConfig;
use tracing::debug;

pub const KEYS_FILE: &str = "keys.json";
pub const STORES_DIR: &str = "stores";
pub const CACHE_DIR: &str = "cache";

pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn open(root: &Path) -> Result<Self> {
        let stores = root.join(STORES_DIR);
        std::fs::create_dir_all(&stores)
            .with_context(|| format!("Failed to create store directory: {}", stores.display()))?;
        debug!(root = %root.display(), "Workspace opened");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn keys(&self) -> Result<Arc<JsonKeyRepository>> {
        let path = self.root.join(KEYS_FILE);
        let keys = JsonKeyRepository::open(&path)
            .with_context(|| format!("Failed to open key file: {}", path.display()))?;
        Ok(Arc::new(keys))
    }

    /// The local store named `name`, created on demand when `create` is set.
    pub fn remote(&self, name: &str, create: bool) -> Result<Arc<LocalDirCloudStore>> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("Invalid store name: {name:?}");
        }
        let dir = self.root.join(STORES_DIR).join(name);
        if !create && !dir.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("store '{name}' does not exist")).into());
        }
        let store = LocalDirCloudStore::open(&dir)
            .with_context(|| format!("Failed to open store: {}", dir.display()))?;
        Ok(Arc::new(store))
    }

    /// The store named `name` behind the encrypting decorator.
    pub fn encrypted(&self, name: &str, create: bool, retention: KeyRetention) -> Result<EncryptingCloudStore> {
        let remote: Arc<dyn CloudStore> = self.remote(name, create)?;
        Ok(EncryptingCloudStore::new(remote, self.keys()?).with_retention(retention))
    }

    /// Every store under `stores/`.
    pub fn registry(&self) -> Result<CloudStoreRegistry> {
        let registry = CloudStoreRegistry::new();
        let count = registry
            .register_from(&LocalDirRegistrar::new(self.root.join(STORES_DIR)))
            .context("Failed to enumerate stores")?;
        debug!(count, "Stores registered");
        Ok(registry)
    }

    /// File-layer configuration: `config` if given, else defaults with the
    /// cache inside the workspace.
    pub fn fs_config(&self, config: Option<&Path>) -> Result<FsConfig> {
        match config {
            Some(path) => Ok(FsConfig::load(path)?),
            None => Ok(FsConfig::new(self.root.join(CACHE_DIR))),
        }
    }
}
