//! Named stores available to the filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::{CloudStore, LocalDirCloudStore};

/// Thread-safe table of stores keyed by [`CloudStore::name`].
///
/// Slices record the name of the store they live in; the registry resolves
/// that name back to a live store when the slice is read or deleted.
#[derive(Default)]
pub struct CloudStoreRegistry {
    stores: DashMap<String, Arc<dyn CloudStore>>,
}

impl CloudStoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `store`, returning the store it replaced under the same name.
    pub fn register(&self, store: Arc<dyn CloudStore>) -> Option<Arc<dyn CloudStore>> {
        let name = store.name().to_string();
        debug!(store = %name, "Registering cloud store");
        self.stores.insert(name, store)
    }

    /// Look up a store by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CloudStore>> {
        self.stores.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a store by name.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn CloudStore>> {
        self.stores.remove(name).map(|(_, store)| store)
    }

    /// Names of all registered stores, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no stores are registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Let `registrar` add its stores. Returns how many it registered.
    pub fn register_from(&self, registrar: &dyn CloudStoreRegistrar) -> io::Result<usize> {
        let count = registrar.register_stores(self)?;
        info!(count, total = self.len(), "Cloud stores registered");
        Ok(count)
    }
}

impl std::fmt::Debug for CloudStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudStoreRegistry")
            .field("stores", &self.names())
            .finish()
    }
}

/// Source of stores discovered from configuration or credentials.
pub trait CloudStoreRegistrar {
    /// Register every store this source knows about. Returns the count.
    fn register_stores(&self, registry: &CloudStoreRegistry) -> io::Result<usize>;
}

/// Registers one [`LocalDirCloudStore`] per sub-directory of `root`.
#[derive(Debug, Clone)]
pub struct LocalDirRegistrar {
    root: PathBuf,
}

impl LocalDirRegistrar {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl CloudStoreRegistrar for LocalDirRegistrar {
    fn register_stores(&self, registry: &CloudStoreRegistry) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let store = LocalDirCloudStore::open(entry.path())?;
            registry.register(Arc::new(store));
            count += 1;
        }
        Ok(count)
    }
}
