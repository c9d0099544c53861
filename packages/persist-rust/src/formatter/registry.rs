use std::sync::{Arc, OnceLock};

use ahash::AHashMap;
use strata_core::Policy;
use tracing::info;

use super::FormatterHandle;
use crate::error::{PersistenceError, Result};

/// Builds a formatter from the configuration snapshot it will hold.
pub type FormatterFactory = Arc<dyn Fn(Policy) -> FormatterHandle + Send + Sync>;

// ---------------------------------------------------------------------------
// FormatterRegistryBuilder
// ---------------------------------------------------------------------------

/// Mutable registration table, filled once at startup.
///
/// Call [`build`](Self::build) when every type is registered; the result is
/// the read-only [`FormatterRegistry`].
#[derive(Default)]
pub struct FormatterRegistryBuilder {
    factories: AHashMap<String, FormatterFactory>,
}

impl FormatterRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `type_tag` with `factory`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::DuplicateType`] if the tag is already registered.
    /// The existing registration is left untouched.
    pub fn register(&mut self, type_tag: impl Into<String>, factory: FormatterFactory) -> Result<()> {
        let type_tag = type_tag.into();
        if self.factories.contains_key(&type_tag) {
            return Err(PersistenceError::DuplicateType { type_tag });
        }
        self.factories.insert(type_tag, factory);
        Ok(())
    }

    /// [`register`](Self::register) for a plain closure.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::DuplicateType`] if the tag is already registered.
    pub fn register_fn<F>(&mut self, type_tag: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(Policy) -> FormatterHandle + Send + Sync + 'static,
    {
        self.register(type_tag, Arc::new(factory))
    }

    #[must_use]
    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> FormatterRegistry {
        FormatterRegistry {
            factories: self.factories,
        }
    }
}

// ---------------------------------------------------------------------------
// FormatterRegistry
// ---------------------------------------------------------------------------

/// Read-only type tag → factory table.
///
/// Lookups take no locks. The registry never caches formatter instances:
/// every [`create_formatter`](Self::create_formatter) call builds a new one.
pub struct FormatterRegistry {
    factories: AHashMap<String, FormatterFactory>,
}

impl FormatterRegistry {
    /// Returns the factory registered for `type_tag`. Repeated lookups return
    /// the same factory.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::UnknownType`] for an unregistered tag.
    pub fn lookup(&self, type_tag: &str) -> Result<FormatterFactory> {
        self.factories
            .get(type_tag)
            .cloned()
            .ok_or_else(|| PersistenceError::UnknownType {
                type_tag: type_tag.to_string(),
            })
    }

    /// Builds a new formatter for `type_tag` holding `policy`.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::UnknownType`] for an unregistered tag.
    pub fn create_formatter(&self, type_tag: &str, policy: &Policy) -> Result<FormatterHandle> {
        let factory = self.lookup(type_tag)?;
        Ok(factory(policy.clone()))
    }

    #[must_use]
    pub fn contains(&self, type_tag: &str) -> bool {
        self.factories.contains_key(type_tag)
    }

    /// Registered type tags, sorted.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for FormatterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatterRegistry")
            .field("types", &self.registered_types())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Process-wide registry
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<Arc<FormatterRegistry>> = OnceLock::new();

/// Installs the process-wide registry. Call once during startup, after
/// every formatter is registered.
///
/// # Errors
///
/// [`PersistenceError::RegistryAlreadyInstalled`] on a second call; the
/// first registry stays installed.
pub fn install_global(registry: FormatterRegistry) -> Result<Arc<FormatterRegistry>> {
    let types = registry.len();
    GLOBAL
        .set(Arc::new(registry))
        .map_err(|_| PersistenceError::RegistryAlreadyInstalled)?;
    info!(types, "formatter registry installed");
    global_registry()
}

/// # Errors
///
/// [`PersistenceError::RegistryNotInstalled`] before [`install_global`].
pub fn global_registry() -> Result<Arc<FormatterRegistry>> {
    GLOBAL
        .get()
        .cloned()
        .ok_or(PersistenceError::RegistryNotInstalled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strata_core::{Archive, Persistable, PropertySet};

    use super::*;
    use crate::formatter::{Formatter, Retrieved};
    use crate::storage::Storage;

    /// Formatter that only remembers its policy.
    struct Inert {
        policy: Policy,
    }

    impl Formatter for Inert {
        fn type_tag(&self) -> &'static str {
            "Inert"
        }

        fn policy(&self) -> &Policy {
            &self.policy
        }

        fn write(
            &self,
            _: &dyn Persistable,
            storage: &mut dyn Storage,
            _: &PropertySet,
            _: usize,
            _: usize,
        ) -> Result<()> {
            Err(crate::formatter::protocol::Site::of(storage).unsupported("Inert", "write"))
        }

        fn read(&self, storage: &mut dyn Storage, _: &PropertySet, _: bool) -> Result<Retrieved> {
            Err(crate::formatter::protocol::Site::of(storage).unsupported("Inert", "read"))
        }

        fn update(&self, _: &dyn Persistable, storage: &mut dyn Storage, _: &PropertySet) -> Result<()> {
            Err(crate::formatter::protocol::Site::of(storage).unsupported("Inert", "update"))
        }

        fn delegate_serialize(&self, _: &mut dyn Archive, _: u32, _: &mut dyn Persistable) -> Result<()> {
            Ok(())
        }
    }

    fn inert_factory() -> FormatterFactory {
        Arc::new(|policy| Arc::new(Inert { policy }) as FormatterHandle)
    }

    #[test]
    fn lookup_returns_the_registered_factory() {
        let factory = inert_factory();
        let mut builder = FormatterRegistryBuilder::new();
        builder.register("Inert", Arc::clone(&factory)).unwrap();
        let registry = builder.build();

        let first = registry.lookup("Inert").unwrap();
        let second = registry.lookup("Inert").unwrap();
        assert!(Arc::ptr_eq(&first, &factory));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = FormatterRegistryBuilder::new().build();
        assert!(registry.is_empty());
        let err = registry.lookup("UnknownType").err().unwrap();
        assert!(matches!(err, PersistenceError::UnknownType { type_tag } if type_tag == "UnknownType"));
        assert!(registry.create_formatter("UnknownType", &Policy::empty()).is_err());
    }

    #[test]
    fn duplicate_registration_keeps_original() {
        let original = inert_factory();
        let mut builder = FormatterRegistryBuilder::new();
        builder.register("Inert", Arc::clone(&original)).unwrap();
        let err = builder.register("Inert", inert_factory()).unwrap_err();
        assert!(matches!(err, PersistenceError::DuplicateType { .. }));
        assert!(!err.is_recoverable());

        let registry = builder.build();
        assert!(Arc::ptr_eq(&registry.lookup("Inert").unwrap(), &original));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn create_formatter_builds_independent_instances() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut builder = FormatterRegistryBuilder::new();
        builder
            .register_fn("Inert", move |policy| {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Inert { policy }) as FormatterHandle
            })
            .unwrap();
        let registry = builder.build();

        let policy = Policy::from_json_str(r#"{"tableName": "inert"}"#).unwrap();
        let a = registry.create_formatter("Inert", &policy).unwrap();
        let b = registry.create_formatter("Inert", &policy).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.policy(), &policy);
        assert_eq!(b.policy().get_string("tableName"), Some("inert"));
    }

    #[test]
    fn registered_types_are_sorted() {
        let mut builder = FormatterRegistryBuilder::new();
        for tag in ["Zeta", "Alpha", "Mid"] {
            builder.register(tag, inert_factory()).unwrap();
        }
        assert!(builder.contains("Mid"));
        let registry = builder.build();
        assert_eq!(registry.registered_types(), vec!["Alpha", "Mid", "Zeta"]);
        assert!(format!("{registry:?}").contains("Alpha"));
    }

    #[test]
    fn global_registry_installs_once() {
        let mut builder = FormatterRegistryBuilder::new();
        builder.register("Inert", inert_factory()).unwrap();
        let installed = install_global(builder.build()).unwrap();
        assert!(installed.contains("Inert"));
        assert!(Arc::ptr_eq(&installed, &global_registry().unwrap()));

        let err = install_global(FormatterRegistryBuilder::new().build()).unwrap_err();
        assert!(matches!(err, PersistenceError::RegistryAlreadyInstalled));
        assert!(global_registry().unwrap().contains("Inert"));
    }
}
