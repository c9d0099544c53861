//! Caller-facing persistence manager.
//!
//! [`Persistence`] resolves an object's formatter from its type tag, opens
//! storages by name, and sequences multi-object writes so that callers never
//! deal with iteration indices or read flags themselves.

use std::sync::Arc;

use dashmap::DashMap;
use strata_core::{Persistable, Policy, PolicyError, PropertySet, PropertyValue};
use tracing::debug;

use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, Result};
use crate::formatter::property_set::WIRE_VERSION_KEY;
use crate::formatter::{FormatterHandle, FormatterRegistry};
use crate::storage::{Storage, StorageList, StorageRegistry};

pub struct Persistence {
    registry: Arc<FormatterRegistry>,
    storages: Arc<StorageRegistry>,
    policy: Policy,
    config: PersistenceConfig,
    /// One formatter per type tag, built on first use.
    formatters: DashMap<String, FormatterHandle>,
}

impl Persistence {
    /// A manager configured from `policy` (see
    /// [`PersistenceConfig::from_policy`]).
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Policy`] if the configuration keys are malformed.
    pub fn new(
        registry: Arc<FormatterRegistry>,
        storages: Arc<StorageRegistry>,
        policy: Policy,
    ) -> Result<Self> {
        let config = PersistenceConfig::from_policy(&policy)?;
        Ok(Self::with_config(registry, storages, policy, config))
    }

    #[must_use]
    pub fn with_config(
        registry: Arc<FormatterRegistry>,
        storages: Arc<StorageRegistry>,
        policy: Policy,
        config: PersistenceConfig,
    ) -> Self {
        Self {
            registry,
            storages,
            policy,
            config,
            formatters: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &FormatterRegistry {
        &self.registry
    }

    /// The policy formatters of `type_tag` are built with: the
    /// `<formatterPolicyRoot>.<type_tag>` subtree, with the default wire
    /// version filled in.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::Policy`] if the default keys cannot be set.
    pub fn formatter_policy(&self, type_tag: &str) -> Result<Policy> {
        let root = &self.config.formatter_policy_root;
        let key = if root.is_empty() {
            type_tag.to_string()
        } else {
            format!("{root}.{type_tag}")
        };
        let mut defaults = PropertySet::new();
        defaults
            .set(
                WIRE_VERSION_KEY,
                PropertyValue::Int(i64::from(self.config.default_wire_version)),
            )
            .map_err(PolicyError::from)?;
        Ok(self
            .policy
            .sub_policy(&key)
            .with_defaults(&Policy::from_property_set(defaults)))
    }

    /// Returns the cached formatter for `type_tag`, creating it on first use.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::UnknownType`] for an unregistered tag.
    pub fn formatter(&self, type_tag: &str) -> Result<FormatterHandle> {
        if let Some(cached) = self.formatters.get(type_tag) {
            return Ok(Arc::clone(cached.value()));
        }
        let created = self
            .registry
            .create_formatter(type_tag, &self.formatter_policy(type_tag)?)?;
        debug!(type_tag, "created formatter");
        let entry = self.formatters.entry(type_tag.to_string()).or_insert(created);
        Ok(Arc::clone(entry.value()))
    }

    /// Opens the storage registered as `name` for writing at `template`
    /// resolved against `additional_data`.
    ///
    /// # Errors
    ///
    /// `UnknownStorage`, `MissingMetadata` or `Storage`.
    pub fn persist_storage(
        &self,
        name: &str,
        template: &str,
        additional_data: &PropertySet,
    ) -> Result<Box<dyn Storage>> {
        self.storages.persist_storage(name, template, additional_data)
    }

    /// Reading counterpart of [`persist_storage`](Self::persist_storage).
    ///
    /// # Errors
    ///
    /// `UnknownStorage`, `MissingMetadata` or `Storage`.
    pub fn retrieve_storage(
        &self,
        name: &str,
        template: &str,
        additional_data: &PropertySet,
    ) -> Result<Box<dyn Storage>> {
        self.storages.retrieve_storage(name, template, additional_data)
    }

    /// Writes `object` as the single record of every storage in `storages`.
    ///
    /// # Errors
    ///
    /// The first failure; later storages are not written.
    pub fn persist(
        &self,
        object: &dyn Persistable,
        storages: &mut StorageList,
        additional_data: &PropertySet,
    ) -> Result<()> {
        let type_tag = object.type_tag();
        if storages.is_empty() {
            return Err(no_storage(type_tag, "persist"));
        }
        let formatter = self.formatter(type_tag)?;
        for storage in storages.iter_mut() {
            debug!(
                type_tag,
                storage = storage.storage_name(),
                location = %storage.location(),
                "write"
            );
            formatter.write(object, storage.as_mut(), additional_data, 0, 1)?;
        }
        Ok(())
    }

    /// Writes `objects` into one storage as a single sequence.
    ///
    /// # Errors
    ///
    /// The first failure. A partially written sequence is never published
    /// by the built-in backends.
    pub fn persist_all(
        &self,
        objects: &[&dyn Persistable],
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
    ) -> Result<()> {
        let total = objects.len();
        for (iteration, object) in objects.iter().enumerate() {
            let type_tag = object.type_tag();
            debug!(
                type_tag,
                storage = storage.storage_name(),
                location = %storage.location(),
                iteration,
                total,
                "write"
            );
            self.formatter(type_tag)?
                .write(*object, storage, additional_data, iteration, total)?;
        }
        Ok(())
    }

    /// Reads the first `type_tag` record of the first storage in `storages`.
    ///
    /// # Errors
    ///
    /// `NoStorage` for an empty list, then any read error.
    pub fn retrieve(
        &self,
        type_tag: &str,
        storages: &mut StorageList,
        additional_data: &PropertySet,
    ) -> Result<Box<dyn Persistable>> {
        let storage = storages
            .first_mut()
            .ok_or_else(|| no_storage(type_tag, "retrieve"))?;
        debug!(
            type_tag,
            storage = storage.storage_name(),
            location = %storage.location(),
            "read"
        );
        let retrieved = self
            .formatter(type_tag)?
            .read(storage.as_mut(), additional_data, true)?;
        Ok(retrieved.object)
    }

    /// [`retrieve`](Self::retrieve) downcast to `T`.
    ///
    /// # Errors
    ///
    /// As `retrieve`, plus `Serialization` if the formatter produced another
    /// type.
    pub fn retrieve_as<T: Persistable>(
        &self,
        type_tag: &str,
        storages: &mut StorageList,
        additional_data: &PropertySet,
    ) -> Result<Box<T>> {
        let object = self.retrieve(type_tag, storages, additional_data)?;
        let found = object.type_tag();
        object.downcast::<T>().ok_or_else(|| {
            PersistenceError::serialization(
                type_tag,
                format!("formatter produced a {found}, not the requested type"),
            )
        })
    }

    /// Reads every `type_tag` record of `storage`, in stored order.
    ///
    /// # Errors
    ///
    /// The first read error.
    pub fn retrieve_all(
        &self,
        type_tag: &str,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
    ) -> Result<Vec<Box<dyn Persistable>>> {
        let formatter = self.formatter(type_tag)?;
        let mut objects = Vec::new();
        let mut first = true;
        loop {
            let retrieved = formatter.read(storage, additional_data, first)?;
            first = false;
            let done = retrieved.done();
            objects.push(retrieved.object);
            if done {
                break;
            }
        }
        debug!(
            type_tag,
            storage = storage.storage_name(),
            location = %storage.location(),
            count = objects.len(),
            "read all"
        );
        Ok(objects)
    }

    /// Updates `object` in every storage of `storages`.
    ///
    /// # Errors
    ///
    /// The first failure, e.g. `NotFound` when the object was never written.
    pub fn update(
        &self,
        object: &dyn Persistable,
        storages: &mut StorageList,
        additional_data: &PropertySet,
    ) -> Result<()> {
        let type_tag = object.type_tag();
        if storages.is_empty() {
            return Err(no_storage(type_tag, "update"));
        }
        let formatter = self.formatter(type_tag)?;
        for storage in storages.iter_mut() {
            debug!(
                type_tag,
                storage = storage.storage_name(),
                location = %storage.location(),
                "update"
            );
            formatter.update(object, storage.as_mut(), additional_data)?;
        }
        Ok(())
    }
}

fn no_storage(type_tag: &str, operation: &'static str) -> PersistenceError {
    PersistenceError::NoStorage {
        type_tag: type_tag.to_string(),
        operation,
    }
}
