//! Registry and read/write protocol laws over generated objects.

use std::sync::Arc;

use proptest::prelude::*;
use strata_core::{ArchiveEncoding, PackageVersions, Persistable, Policy, PropertySet, PropertyValue};
use strata_persist::storage::{
    ArchiveFileStorage, Database, DocumentFileStorage, MemoryStorage, MemoryVault, TableStorage,
};
use strata_persist::{
    register_builtin_formatters, AccessMode, Formatter, FormatterRegistry,
    FormatterRegistryBuilder, LogicalLocation, PersistenceError, ReadMisuse, Storage,
};

fn registry() -> FormatterRegistry {
    let mut builder = FormatterRegistryBuilder::new();
    register_builtin_formatters(&mut builder).unwrap();
    builder.build()
}

fn scalar() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::Int),
        // Finite doubles with short exact decimal forms.
        (-1_000_000_i32..1_000_000).prop_map(|n| PropertyValue::Double(f64::from(n) / 8.0)),
        prop_oneof![Just(f64::INFINITY), Just(f64::NEG_INFINITY), Just(f64::NAN)]
            .prop_map(PropertyValue::Double),
        "[a-zA-Z0-9 _/-]{0,12}".prop_map(PropertyValue::String),
        proptest::collection::vec(any::<u8>(), 0..8).prop_map(PropertyValue::Bytes),
    ]
}

fn value() -> impl Strategy<Value = PropertyValue> {
    scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(PropertyValue::Array),
            proptest::collection::vec(("[a-z]{1,6}", inner), 0..4)
                .prop_map(|entries| PropertyValue::Set(build_set(entries))),
        ]
    })
}

fn build_set(entries: Vec<(String, PropertyValue)>) -> PropertySet {
    let mut set = PropertySet::new();
    for (name, value) in entries {
        set.set(&name, value).unwrap();
    }
    set
}

fn property_set() -> impl Strategy<Value = PropertySet> {
    proptest::collection::vec(("[a-z]{1,6}", value()), 0..6).prop_map(build_set)
}

/// Manifests including entries the fixed-width text form cannot hold:
/// multi-word products and versions, empty or unevenly spaced info.
fn manifest() -> impl Strategy<Value = PackageVersions> {
    proptest::collection::vec(
        ("[a-z_]{1,8}( [a-z]{1,3})?", "[0-9][0-9.]{0,5}( b)?", "[ a-z/:]{0,12}"),
        0..6,
    )
    .prop_map(|entries| {
        let mut m = PackageVersions::new();
        for (product, version, info) in entries {
            m.insert(product, version, info);
        }
        m
    })
}

/// Equality that treats NaN as equal to itself.
fn same_value(a: &PropertyValue, b: &PropertyValue) -> bool {
    match (a, b) {
        (PropertyValue::Double(x), PropertyValue::Double(y)) => {
            x == y || (x.is_nan() && y.is_nan())
        }
        (PropertyValue::Array(xs), PropertyValue::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (PropertyValue::Set(x), PropertyValue::Set(y)) => same_set(x, y),
        _ => a == b,
    }
}

fn same_set(a: &PropertySet, b: &PropertySet) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((n, x), (m, y))| n == m && same_value(x, y))
}

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    BinaryFile,
    TextFile,
    Table,
    Document,
}

const BACKENDS: [Backend; 5] = [
    Backend::Memory,
    Backend::BinaryFile,
    Backend::TextFile,
    Backend::Table,
    Backend::Document,
];

struct Fixture {
    dir: tempfile::TempDir,
    vault: Arc<MemoryVault>,
    db: Arc<Database>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            vault: Arc::new(MemoryVault::new()),
            db: Arc::new(Database::new()),
        }
    }

    fn file(&self, name: &str) -> LogicalLocation {
        LogicalLocation::new(self.dir.path().join(name).display().to_string())
    }

    fn open(&self, backend: Backend, mode: AccessMode) -> Box<dyn Storage> {
        match backend {
            Backend::Memory => Box::new(MemoryStorage::new(
                Arc::clone(&self.vault),
                LogicalLocation::new("laws"),
                mode,
            )),
            Backend::BinaryFile => Box::new(ArchiveFileStorage::new(
                self.file("laws.bin"),
                mode,
                ArchiveEncoding::Binary,
            )),
            Backend::TextFile => Box::new(ArchiveFileStorage::new(
                self.file("laws.jsonl"),
                mode,
                ArchiveEncoding::Text,
            )),
            Backend::Table => Box::new(TableStorage::new(
                Arc::clone(&self.db),
                LogicalLocation::new("laws"),
                mode,
            )),
            Backend::Document => Box::new(DocumentFileStorage::new(self.file("laws.json"), mode)),
        }
    }
}

/// Writes `object` alone to a fresh `backend` and reads it back.
fn round_trip(
    formatter: &dyn Formatter,
    object: &dyn Persistable,
    backend: Backend,
) -> Result<Box<dyn Persistable>, PersistenceError> {
    let fixture = Fixture::new();
    let mut out = fixture.open(backend, AccessMode::Persist);
    formatter.write(object, out.as_mut(), &PropertySet::new(), 0, 1)?;
    let mut input = fixture.open(backend, AccessMode::Retrieve);
    let got = formatter.read(input.as_mut(), &PropertySet::new(), true)?;
    assert!(got.done(), "{backend:?} left a single write unfinished");
    Ok(got.object)
}

fn memory(vault: &Arc<MemoryVault>, mode: AccessMode) -> MemoryStorage {
    MemoryStorage::new(Arc::clone(vault), LogicalLocation::new("laws"), mode)
}

proptest! {
    #[test]
    fn equal_policies_give_byte_identical_output(set in property_set()) {
        let registry = registry();
        let policy = Policy::from_json_str(r#"{"wireVersion": 2}"#).unwrap();
        let a = registry.create_formatter("PropertySet", &policy).unwrap();
        let b = registry.create_formatter("PropertySet", &policy.clone()).unwrap();
        prop_assert!(!Arc::ptr_eq(&a, &b));

        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        for (formatter, file) in [(&a, "a.bin"), (&b, "b.bin")] {
            let path = dir.path().join(file);
            let mut out = ArchiveFileStorage::new(
                LogicalLocation::new(path.display().to_string()),
                AccessMode::Persist,
                ArchiveEncoding::Binary,
            );
            formatter.write(&set, &mut out, &PropertySet::new(), 0, 1).unwrap();
            bytes.push(std::fs::read(&path).unwrap());
        }
        prop_assert_eq!(&bytes[0], &bytes[1]);
    }

    #[test]
    fn single_write_reads_back_equal_and_done(set in property_set()) {
        let f = registry().create_formatter("PropertySet", &Policy::empty()).unwrap();
        let vault = Arc::new(MemoryVault::new());
        let mut out = memory(&vault, AccessMode::Persist);
        f.write(&set, &mut out, &PropertySet::new(), 0, 1).unwrap();

        let mut input = memory(&vault, AccessMode::Retrieve);
        let got = f.read(&mut input, &PropertySet::new(), true).unwrap();
        prop_assert!(got.done());
        let read = got.object.downcast::<PropertySet>().unwrap();
        prop_assert!(same_set(&read, &set));
    }

    #[test]
    fn sequenced_write_reads_in_order(sets in proptest::collection::vec(property_set(), 1..6)) {
        let f = registry().create_formatter("PropertySet", &Policy::empty()).unwrap();
        let vault = Arc::new(MemoryVault::new());
        let mut out = memory(&vault, AccessMode::Persist);
        let total = sets.len();
        for (i, set) in sets.iter().enumerate() {
            f.write(set, &mut out, &PropertySet::new(), i, total).unwrap();
        }

        let mut input = memory(&vault, AccessMode::Retrieve);
        let mut read = Vec::new();
        for i in 0..total {
            let got = f.read(&mut input, &PropertySet::new(), i == 0).unwrap();
            prop_assert_eq!(got.done(), i + 1 == total);
            read.push(*got.object.downcast::<PropertySet>().unwrap());
        }
        prop_assert_eq!(read.len(), sets.len());
        prop_assert!(read.iter().zip(&sets).all(|(a, b)| same_set(a, b)));

        let err = f.read(&mut input, &PropertySet::new(), false).unwrap_err();
        let is_exhausted = matches!(
            err,
            PersistenceError::ReadProtocol { misuse: ReadMisuse::Exhausted, .. }
        );
        prop_assert!(is_exhausted);
    }

    #[test]
    fn property_sets_round_trip_on_every_backend(set in property_set()) {
        let f = registry().create_formatter("PropertySet", &Policy::empty()).unwrap();
        for backend in BACKENDS {
            let read = round_trip(&*f, &set, backend).unwrap();
            let read = read.downcast_ref::<PropertySet>().unwrap();
            prop_assert!(same_set(read, &set), "{:?} changed {:?} into {:?}", backend, set, read);
        }
    }

    #[test]
    fn wire_version_one_refuses_or_round_trips(set in property_set()) {
        let policy = Policy::from_json_str(r#"{"wireVersion": 1}"#).unwrap();
        let f = registry().create_formatter("PropertySet", &policy).unwrap();
        for backend in [Backend::Memory, Backend::BinaryFile, Backend::TextFile] {
            match round_trip(&*f, &set, backend) {
                Ok(read) => {
                    let read = read.downcast_ref::<PropertySet>().unwrap();
                    prop_assert!(same_set(read, &set), "{:?} changed {:?} into {:?}", backend, set, read);
                }
                Err(err) => {
                    let refused = matches!(err, PersistenceError::Serialization { .. });
                    prop_assert!(refused, "{:?}: {}", backend, err);
                }
            }
        }
    }

    #[test]
    fn manifests_round_trip_or_are_refused(manifest in manifest()) {
        let f = registry().create_formatter("PackageVersions", &Policy::empty()).unwrap();
        let text_form = manifest.check_text_form().is_ok();
        for backend in BACKENDS {
            match round_trip(&*f, &manifest, backend) {
                Ok(read) => {
                    let allowed = text_form || !matches!(backend, Backend::Document);
                    prop_assert!(allowed, "{:?} accepted {:?}", backend, manifest);
                    prop_assert_eq!(read.downcast_ref::<PackageVersions>(), Some(&manifest));
                }
                Err(err) => {
                    let refused = matches!(backend, Backend::Document)
                        && !text_form
                        && matches!(err, PersistenceError::Serialization { .. });
                    prop_assert!(refused, "{:?}: {}", backend, err);
                }
            }
        }
    }

    #[test]
    fn duplicate_registration_never_replaces(tag in "[A-Z][a-z]{2,8}") {
        let mut builder = FormatterRegistryBuilder::new();
        register_builtin_formatters(&mut builder).unwrap();
        let original = registry().lookup("PropertySet").unwrap();
        builder.register(tag.clone(), Arc::clone(&original)).unwrap();
        let err = builder
            .register(tag.clone(), registry().lookup("PackageVersions").unwrap())
            .unwrap_err();
        let is_duplicate = matches!(err, PersistenceError::DuplicateType { .. });
        prop_assert!(is_duplicate);

        let built = builder.build();
        prop_assert!(Arc::ptr_eq(&built.lookup(&tag).unwrap(), &original));
        prop_assert!(Arc::ptr_eq(&built.lookup(&tag).unwrap(), &built.lookup(&tag).unwrap()));
    }
}

#[test]
fn read_after_exhausted_never_returns_stale_data() {
    let f = registry().create_formatter("PropertySet", &Policy::empty()).unwrap();
    let vault = Arc::new(MemoryVault::new());
    let mut out = memory(&vault, AccessMode::Persist);
    let mut set = PropertySet::new();
    set.set("only", true).unwrap();
    f.write(&set, &mut out, &PropertySet::new(), 0, 1).unwrap();

    let mut input = memory(&vault, AccessMode::Retrieve);
    let storage: &mut dyn Storage = &mut input;
    assert!(f.read(storage, &PropertySet::new(), true).unwrap().done());
    for first in [true, false] {
        let err = f.read(storage, &PropertySet::new(), first).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::ReadProtocol { misuse: ReadMisuse::Exhausted, .. }
        ));
    }
}
