//! Storage factories keyed by storage name.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use strata_core::{ArchiveEncoding, PropertySet};

use super::{
    AccessMode, ArchiveFileStorage, Database, DocumentFileStorage, LogicalLocation, MemoryStorage,
    MemoryVault, Storage, TableStorage,
};
use crate::error::{PersistenceError, Result};

/// Opens a storage handle for a resolved location.
pub type StorageFactory =
    Arc<dyn Fn(LogicalLocation, AccessMode) -> anyhow::Result<Box<dyn Storage>> + Send + Sync>;

/// Wraps a closure as a [`StorageFactory`].
pub fn storage_factory<F>(factory: F) -> StorageFactory
where
    F: Fn(LogicalLocation, AccessMode) -> anyhow::Result<Box<dyn Storage>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Name of the JSON-lines flavour of [`ArchiveFileStorage`].
pub const TEXT_ARCHIVE_FILE: &str = "TextArchiveFile";

/// Maps storage names (as used in location descriptions) to factories.
pub struct StorageRegistry {
    factories: DashMap<&'static str, StorageFactory>,
}

impl StorageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// A registry with every backend shipped in this crate. File backends
    /// resolve relative locations against `root`.
    #[must_use]
    pub fn with_builtin(root: PathBuf, vault: Arc<MemoryVault>, database: Arc<Database>) -> Self {
        let registry = Self::new();
        let file_root = root.clone();
        let text_root = root.clone();
        let doc_root = root;

        let builtin = [
            (
                MemoryStorage::NAME,
                storage_factory(move |loc, mode| {
                    Ok(Box::new(MemoryStorage::new(Arc::clone(&vault), loc, mode)))
                }),
            ),
            (
                ArchiveFileStorage::NAME,
                storage_factory(move |loc, mode| {
                    let loc = loc.with_root(&file_root);
                    Ok(Box::new(ArchiveFileStorage::new(loc, mode, ArchiveEncoding::Binary)))
                }),
            ),
            (
                TEXT_ARCHIVE_FILE,
                storage_factory(move |loc, mode| {
                    let loc = loc.with_root(&text_root);
                    Ok(Box::new(ArchiveFileStorage::new(loc, mode, ArchiveEncoding::Text)))
                }),
            ),
            (
                TableStorage::NAME,
                storage_factory(move |loc, mode| {
                    Ok(Box::new(TableStorage::new(Arc::clone(&database), loc, mode)))
                }),
            ),
            (
                DocumentFileStorage::NAME,
                storage_factory(move |loc, mode| {
                    Ok(Box::new(DocumentFileStorage::new(loc.with_root(&doc_root), mode)))
                }),
            ),
        ];
        for (name, factory) in builtin {
            registry.factories.insert(name, factory);
        }
        registry
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::DuplicateStorage`] if the name is taken; the
    /// existing factory is kept.
    pub fn register(&self, name: &'static str, factory: StorageFactory) -> Result<()> {
        match self.factories.entry(name) {
            Entry::Occupied(_) => Err(PersistenceError::DuplicateStorage {
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(factory);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered storage names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.iter().map(|e| *e.key()).collect();
        names.sort_unstable();
        names
    }

    /// Opens a handle through the factory registered under `name`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::UnknownStorage`] for an unregistered name,
    /// [`PersistenceError::Storage`] if the factory fails.
    pub fn open(
        &self,
        name: &str,
        location: LogicalLocation,
        mode: AccessMode,
    ) -> Result<Box<dyn Storage>> {
        let (key, factory) = self
            .factories
            .get(name)
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .ok_or_else(|| PersistenceError::UnknownStorage {
                name: name.to_string(),
            })?;
        let display = location.to_string();
        factory(location, mode).map_err(|source| PersistenceError::Storage {
            storage: key,
            location: display,
            source,
        })
    }

    /// Resolves `template` against `additional_data` and opens it for writing.
    ///
    /// # Errors
    ///
    /// See [`LogicalLocation::resolve`] and [`open`](Self::open).
    pub fn persist_storage(
        &self,
        name: &str,
        template: &str,
        additional_data: &PropertySet,
    ) -> Result<Box<dyn Storage>> {
        let location = LogicalLocation::resolve(template, additional_data)?;
        self.open(name, location, AccessMode::Persist)
    }

    /// Resolves `template` against `additional_data` and opens it for reading.
    ///
    /// # Errors
    ///
    /// See [`LogicalLocation::resolve`] and [`open`](Self::open).
    pub fn retrieve_storage(
        &self,
        name: &str,
        template: &str,
        additional_data: &PropertySet,
    ) -> Result<Box<dyn Storage>> {
        let location = LogicalLocation::resolve(template, additional_data)?;
        self.open(name, location, AccessMode::Retrieve)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
