//! Formatter for [`PackageVersions`] manifests.
//!
//! Record streams carry archived fields (wire version 1: entry count, then
//! product, version and info strings per entry). A row store keeps one row
//! per manifest mapping each product to a `{version, info}` set. Documents
//! use the fixed-width text format of [`PackageVersions::to_text`]; a
//! manifest that format would alter is refused rather than written.

use std::sync::Arc;

use strata_core::property::PATH_SEPARATOR;
use strata_core::{
    Archive, ArchiveError, ArchiveMode, PackageVersions, Persistable, Policy, PropertySet,
    PACKAGE_VERSIONS_TYPE,
};

use super::protocol::{self, Capability, Site};
use super::{Formatter, FormatterFactory, FormatterHandle, Retrieved};
use crate::error::{PersistenceError, Result};
use crate::storage::Storage;

pub const WIRE_VERSION: u32 = 1;

pub struct PackageVersionsFormatter {
    policy: Policy,
}

impl PackageVersionsFormatter {
    /// The registry factory. There is no other way to obtain an instance.
    #[must_use]
    pub fn factory() -> FormatterFactory {
        Arc::new(|policy| Arc::new(Self { policy }) as FormatterHandle)
    }
}

impl Formatter for PackageVersionsFormatter {
    fn type_tag(&self) -> &'static str {
        PACKAGE_VERSIONS_TYPE
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn write(
        &self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
        iteration: usize,
        total: usize,
    ) -> Result<()> {
        let manifest = protocol::expect_object::<PackageVersions>(object, PACKAGE_VERSIONS_TYPE)?;
        match protocol::capability(storage) {
            Capability::RecordStream => {
                let record = protocol::archive_with(PACKAGE_VERSIONS_TYPE, WIRE_VERSION, |ar| {
                    save_fields(ar, WIRE_VERSION, manifest)
                })?;
                protocol::append_record(storage, &record, iteration, total)
            }
            Capability::RowStore => {
                let table =
                    protocol::table_name(additional_data, &self.policy, PACKAGE_VERSIONS_TYPE);
                protocol::stage_row(
                    storage,
                    PACKAGE_VERSIONS_TYPE,
                    &table,
                    protocol::item_id(additional_data),
                    to_row(manifest)?,
                    iteration,
                    total,
                )
            }
            Capability::Document => protocol::write_document(
                storage,
                PACKAGE_VERSIONS_TYPE,
                &to_document(manifest)?,
                iteration,
                total,
            ),
            Capability::None => Err(Site::of(storage).unsupported(PACKAGE_VERSIONS_TYPE, "write")),
        }
    }

    fn read(
        &self,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
        first: bool,
    ) -> Result<Retrieved> {
        let (manifest, progress) = match protocol::capability(storage) {
            Capability::RecordStream => {
                let (record, progress) =
                    protocol::next_record(storage, PACKAGE_VERSIONS_TYPE, first)?;
                let manifest =
                    protocol::unarchive_with(record, |ar, version| load_fields(ar, version))?;
                (manifest, progress)
            }
            Capability::RowStore => {
                let table =
                    protocol::table_name(additional_data, &self.policy, PACKAGE_VERSIONS_TYPE);
                let (row, progress) =
                    protocol::next_row(storage, PACKAGE_VERSIONS_TYPE, &table, first)?;
                (from_row(&row)?, progress)
            }
            Capability::Document => {
                let (text, progress) =
                    protocol::read_document(storage, PACKAGE_VERSIONS_TYPE, first)?;
                let manifest = PackageVersions::parse(&text).map_err(|e| {
                    PersistenceError::serialization(PACKAGE_VERSIONS_TYPE, e.to_string())
                })?;
                (manifest, progress)
            }
            Capability::None => {
                return Err(Site::of(storage).unsupported(PACKAGE_VERSIONS_TYPE, "read"));
            }
        };
        Ok(Retrieved {
            object: Box::new(manifest),
            progress,
        })
    }

    fn update(
        &self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
    ) -> Result<()> {
        let manifest = protocol::expect_object::<PackageVersions>(object, PACKAGE_VERSIONS_TYPE)?;
        match protocol::capability(storage) {
            Capability::RowStore => {
                let table =
                    protocol::table_name(additional_data, &self.policy, PACKAGE_VERSIONS_TYPE);
                let key = protocol::require_item_id(additional_data)?;
                protocol::replace_row(storage, PACKAGE_VERSIONS_TYPE, &table, &key, to_row(manifest)?)
            }
            Capability::Document => {
                protocol::replace_document(storage, PACKAGE_VERSIONS_TYPE, &to_document(manifest)?)
            }
            Capability::RecordStream | Capability::None => {
                Err(Site::of(storage).unsupported(PACKAGE_VERSIONS_TYPE, "update"))
            }
        }
    }

    fn delegate_serialize(
        &self,
        archive: &mut dyn Archive,
        version: u32,
        object: &mut dyn Persistable,
    ) -> Result<()> {
        let wrap = |e| PersistenceError::archive(PACKAGE_VERSIONS_TYPE, e);
        match archive.mode() {
            ArchiveMode::Saving => {
                let manifest =
                    protocol::expect_object::<PackageVersions>(&*object, PACKAGE_VERSIONS_TYPE)?;
                save_fields(archive, version, manifest).map_err(wrap)
            }
            ArchiveMode::Loading => {
                let target =
                    protocol::expect_object_mut::<PackageVersions>(object, PACKAGE_VERSIONS_TYPE)?;
                *target = load_fields(archive, version).map_err(wrap)?;
                Ok(())
            }
        }
    }
}

fn check_version(version: u32) -> Result<(), ArchiveError> {
    if version == WIRE_VERSION {
        Ok(())
    } else {
        Err(ArchiveError::UnsupportedVersion {
            type_tag: PACKAGE_VERSIONS_TYPE.to_string(),
            version,
        })
    }
}

fn save_fields(
    ar: &mut dyn Archive,
    version: u32,
    manifest: &PackageVersions,
) -> Result<(), ArchiveError> {
    check_version(version)?;
    ar.save_len(manifest.len())?;
    for (product, entry) in manifest.iter() {
        ar.save_str(product)?;
        ar.save_str(&entry.version)?;
        ar.save_str(&entry.info)?;
    }
    Ok(())
}

fn load_fields(ar: &mut dyn Archive, version: u32) -> Result<PackageVersions, ArchiveError> {
    check_version(version)?;
    let count = ar.load_len()?;
    let mut manifest = PackageVersions::new();
    for _ in 0..count {
        let product = ar.load_str()?;
        let release = ar.load_str()?;
        let info = ar.load_str()?;
        manifest.insert(product, release, info);
    }
    Ok(manifest)
}

fn to_document(manifest: &PackageVersions) -> Result<String> {
    manifest
        .try_to_text()
        .map_err(|e| PersistenceError::serialization(PACKAGE_VERSIONS_TYPE, e.to_string()))
}

fn to_row(manifest: &PackageVersions) -> Result<PropertySet> {
    let mut row = PropertySet::new();
    for (product, entry) in manifest.iter() {
        if product.is_empty() || product.contains(PATH_SEPARATOR) {
            return Err(PersistenceError::serialization(
                PACKAGE_VERSIONS_TYPE,
                format!("product name {product:?} cannot be used as a column"),
            ));
        }
        let column = |e: strata_core::PropertyError| {
            PersistenceError::serialization(PACKAGE_VERSIONS_TYPE, e.to_string())
        };
        let mut fields = PropertySet::new();
        fields.set("version", entry.version.as_str()).map_err(column)?;
        fields.set("info", entry.info.as_str()).map_err(column)?;
        row.set(product, fields).map_err(column)?;
    }
    Ok(row)
}

fn from_row(row: &PropertySet) -> Result<PackageVersions> {
    let mut manifest = PackageVersions::new();
    for (product, value) in row.iter() {
        let fields = value.as_set();
        let version = fields.and_then(|f| f.get_string("version"));
        let info = fields.and_then(|f| f.get_string("info")).unwrap_or_default();
        let Some(version) = version else {
            return Err(PersistenceError::serialization(
                PACKAGE_VERSIONS_TYPE,
                format!("row column {product:?} has no version"),
            ));
        };
        manifest.insert(product, version, info);
    }
    Ok(manifest)
}
