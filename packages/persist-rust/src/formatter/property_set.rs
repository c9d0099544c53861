//! Formatter for [`PropertySet`] payloads.
//!
//! Record streams carry archived fields (wire version from the policy key
//! `wireVersion`, default 2). Row stores hold the set itself as the row.
//! Documents hold the set as pretty-printed JSON.
//!
//! Wire version 1 is flat: one entry per leaf with its full dotted name,
//! arrays written as the same name repeated. It has no form for arrays of
//! sets, arrays of fewer than two elements or empty nested sets, and
//! writing one of those fails. Wire version 2 is hierarchical and lossless.

use std::sync::Arc;

use strata_core::property::PATH_SEPARATOR;
use strata_core::{
    Archive, ArchiveError, ArchiveMode, Persistable, Policy, PropertyKind, PropertySet,
    PropertyValue, PROPERTY_SET_TYPE,
};
use tracing::trace;

use super::protocol::{self, Capability, Site};
use super::{Formatter, FormatterFactory, FormatterHandle, Retrieved};
use crate::error::{PersistenceError, Result};
use crate::storage::Storage;

/// Policy key selecting the wire version new records are written with.
pub const WIRE_VERSION_KEY: &str = "wireVersion";
pub const DEFAULT_WIRE_VERSION: u32 = 2;

pub struct PropertySetFormatter {
    policy: Policy,
}

impl PropertySetFormatter {
    /// The registry factory. There is no other way to obtain an instance.
    #[must_use]
    pub fn factory() -> FormatterFactory {
        Arc::new(|policy| Arc::new(Self { policy }) as FormatterHandle)
    }

    fn wire_version(&self) -> Result<u32> {
        let configured = self
            .policy
            .int_or(WIRE_VERSION_KEY, i64::from(DEFAULT_WIRE_VERSION));
        u32::try_from(configured).map_err(|_| {
            PersistenceError::serialization(
                PROPERTY_SET_TYPE,
                format!("invalid {WIRE_VERSION_KEY} {configured}"),
            )
        })
    }
}

impl Formatter for PropertySetFormatter {
    fn type_tag(&self) -> &'static str {
        PROPERTY_SET_TYPE
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
        let set = protocol::expect_object::<PropertySet>(object, PROPERTY_SET_TYPE)?;
        match protocol::capability(storage) {
            Capability::RecordStream => {
                let version = self.wire_version()?;
                let record = protocol::archive_with(PROPERTY_SET_TYPE, version, |ar| {
                    save_fields(ar, version, set)
                })?;
                trace!(version, fields = record.tokens.len(), "archived property set");
                protocol::append_record(storage, &record, iteration, total)
            }
            Capability::RowStore => {
                let table = protocol::table_name(additional_data, &self.policy, PROPERTY_SET_TYPE);
                let key = protocol::item_id(additional_data);
                protocol::stage_row(
                    storage,
                    PROPERTY_SET_TYPE,
                    &table,
                    key,
                    set.clone(),
                    iteration,
                    total,
                )
            }
            Capability::Document => {
                let text = to_json(set)?;
                protocol::write_document(storage, PROPERTY_SET_TYPE, &text, iteration, total)
            }
            Capability::None => Err(Site::of(storage).unsupported(PROPERTY_SET_TYPE, "write")),
        }
    }

    fn read(
        &self,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
        first: bool,
    ) -> Result<Retrieved> {
        let (set, progress) = match protocol::capability(storage) {
            Capability::RecordStream => {
                let (record, progress) = protocol::next_record(storage, PROPERTY_SET_TYPE, first)?;
                let set = protocol::unarchive_with(record, |ar, version| load_fields(ar, version))?;
                (set, progress)
            }
            Capability::RowStore => {
                let table = protocol::table_name(additional_data, &self.policy, PROPERTY_SET_TYPE);
                protocol::next_row(storage, PROPERTY_SET_TYPE, &table, first)?
            }
            Capability::Document => {
                let (text, progress) = protocol::read_document(storage, PROPERTY_SET_TYPE, first)?;
                let set = serde_json::from_str::<PropertySet>(&text).map_err(|e| {
                    PersistenceError::serialization(PROPERTY_SET_TYPE, e.to_string())
                })?;
                (set, progress)
            }
            Capability::None => {
                return Err(Site::of(storage).unsupported(PROPERTY_SET_TYPE, "read"));
            }
        };
        Ok(Retrieved {
            object: Box::new(set),
            progress,
        })
    }

    fn update(
        &self,
        object: &dyn Persistable,
        storage: &mut dyn Storage,
        additional_data: &PropertySet,
    ) -> Result<()> {
        let set = protocol::expect_object::<PropertySet>(object, PROPERTY_SET_TYPE)?;
        match protocol::capability(storage) {
            Capability::RowStore => {
                let table = protocol::table_name(additional_data, &self.policy, PROPERTY_SET_TYPE);
                let key = protocol::require_item_id(additional_data)?;
                protocol::replace_row(storage, PROPERTY_SET_TYPE, &table, &key, set.clone())
            }
            Capability::Document => {
                protocol::replace_document(storage, PROPERTY_SET_TYPE, &to_json(set)?)
            }
            Capability::RecordStream | Capability::None => {
                Err(Site::of(storage).unsupported(PROPERTY_SET_TYPE, "update"))
            }
        }
    }

    fn delegate_serialize(
        &self,
        archive: &mut dyn Archive,
        version: u32,
        object: &mut dyn Persistable,
    ) -> Result<()> {
        match archive.mode() {
            ArchiveMode::Saving => {
                let set = protocol::expect_object::<PropertySet>(&*object, PROPERTY_SET_TYPE)?;
                save_fields(archive, version, set)
                    .map_err(|e| PersistenceError::archive(PROPERTY_SET_TYPE, e))
            }
            ArchiveMode::Loading => {
                let target = protocol::expect_object_mut::<PropertySet>(object, PROPERTY_SET_TYPE)?;
                *target = load_fields(archive, version)
                    .map_err(|e| PersistenceError::archive(PROPERTY_SET_TYPE, e))?;
                Ok(())
            }
        }
    }
}

fn to_json(set: &PropertySet) -> Result<String> {
    serde_json::to_string_pretty(set)
        .map_err(|e| PersistenceError::serialization(PROPERTY_SET_TYPE, e.to_string()))
}

fn unsupported(version: u32) -> ArchiveError {
    ArchiveError::UnsupportedVersion {
        type_tag: PROPERTY_SET_TYPE.to_string(),
        version,
    }
}

fn save_fields(ar: &mut dyn Archive, version: u32, set: &PropertySet) -> Result<(), ArchiveError> {
    match version {
        1 => save_flat(ar, set),
        2 => save_tree(ar, set),
        other => Err(unsupported(other)),
    }
}

fn load_fields(ar: &mut dyn Archive, version: u32) -> Result<PropertySet, ArchiveError> {
    match version {
        1 => load_flat(ar),
        2 => load_tree(ar),
        other => Err(unsupported(other)),
    }
}

fn save_scalar(ar: &mut dyn Archive, value: &PropertyValue) -> Result<(), ArchiveError> {
    match value {
        PropertyValue::Bool(b) => ar.save_bool(*b),
        PropertyValue::Int(i) => ar.save_i64(*i),
        PropertyValue::Double(d) => ar.save_f64(*d),
        PropertyValue::String(s) => ar.save_str(s),
        PropertyValue::Bytes(b) => ar.save_bytes(b),
        PropertyValue::Array(_) | PropertyValue::Set(_) => Err(ArchiveError::Invalid(format!(
            "{:?} is not a scalar kind",
            value.kind()
        ))),
    }
}

fn load_scalar(ar: &mut dyn Archive, kind: PropertyKind) -> Result<PropertyValue, ArchiveError> {
    Ok(match kind {
        PropertyKind::Bool => PropertyValue::Bool(ar.load_bool()?),
        PropertyKind::Int => PropertyValue::Int(ar.load_i64()?),
        PropertyKind::Double => PropertyValue::Double(ar.load_f64()?),
        PropertyKind::String => PropertyValue::String(ar.load_str()?),
        PropertyKind::Bytes => PropertyValue::Bytes(ar.load_bytes()?),
        PropertyKind::Array | PropertyKind::Set => {
            return Err(ArchiveError::Invalid(format!("{kind:?} is not a scalar kind")));
        }
    })
}

fn load_kind(ar: &mut dyn Archive) -> Result<PropertyKind, ArchiveError> {
    let code = ar.load_u32()?;
    PropertyKind::from_code(code)
        .ok_or_else(|| ArchiveError::Invalid(format!("unknown property kind code {code}")))
}

// Version 1: count, then (dotted name, kind code, scalar) per leaf value.

fn save_flat(ar: &mut dyn Archive, set: &PropertySet) -> Result<(), ArchiveError> {
    let mut leaves: Vec<(String, &PropertyValue)> = Vec::new();
    flat_leaves(set, "", &mut leaves)?;
    ar.save_len(leaves.len())?;
    for (path, value) in leaves {
        ar.save_str(&path)?;
        ar.save_u32(value.kind().code())?;
        save_scalar(ar, value)?;
    }
    Ok(())
}

/// Collects the version 1 leaves of `set`, refusing every shape that would
/// read back differently.
fn flat_leaves<'a>(
    set: &'a PropertySet,
    prefix: &str,
    leaves: &mut Vec<(String, &'a PropertyValue)>,
) -> Result<(), ArchiveError> {
    for (name, value) in set.iter() {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}{PATH_SEPARATOR}{name}")
        };
        match value {
            PropertyValue::Set(nested) if nested.is_empty() => {
                return Err(ArchiveError::Invalid(format!(
                    "empty set {path:?} has no version 1 form"
                )));
            }
            PropertyValue::Set(nested) => flat_leaves(nested, &path, leaves)?,
            PropertyValue::Array(values) => {
                if values.len() < 2 {
                    return Err(ArchiveError::Invalid(format!(
                        "array {path:?} of {} elements has no version 1 form",
                        values.len()
                    )));
                }
                for element in values {
                    if !element.kind().is_scalar() {
                        return Err(ArchiveError::Invalid(format!(
                            "array {path:?} holds a {:?}; version 1 stores scalars only",
                            element.kind()
                        )));
                    }
                    leaves.push((path.clone(), element));
                }
            }
            scalar => leaves.push((path, scalar)),
        }
    }
    Ok(())
}

fn load_flat(ar: &mut dyn Archive) -> Result<PropertySet, ArchiveError> {
    let count = ar.load_len()?;
    let mut set = PropertySet::new();
    for _ in 0..count {
        let path = ar.load_str()?;
        let kind = load_kind(ar)?;
        let value = load_scalar(ar, kind)?;
        set.add(&path, value)
            .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
    }
    Ok(set)
}

// Version 2: count, then (name, value) per entry, where a value is its kind
// code followed by a scalar, an element count and elements, or a nested set.

fn save_tree(ar: &mut dyn Archive, set: &PropertySet) -> Result<(), ArchiveError> {
    ar.save_len(set.len())?;
    for (name, value) in set.iter() {
        ar.save_str(name)?;
        save_tree_value(ar, value)?;
    }
    Ok(())
}

fn save_tree_value(ar: &mut dyn Archive, value: &PropertyValue) -> Result<(), ArchiveError> {
    ar.save_u32(value.kind().code())?;
    match value {
        PropertyValue::Array(values) => {
            ar.save_len(values.len())?;
            values.iter().try_for_each(|v| save_tree_value(ar, v))
        }
        PropertyValue::Set(nested) => save_tree(ar, nested),
        scalar => save_scalar(ar, scalar),
    }
}

fn load_tree(ar: &mut dyn Archive) -> Result<PropertySet, ArchiveError> {
    let count = ar.load_len()?;
    let mut set = PropertySet::new();
    for _ in 0..count {
        let name = ar.load_str()?;
        if name.contains(PATH_SEPARATOR) || set.contains(&name) {
            return Err(ArchiveError::Invalid(format!(
                "invalid or duplicate property name {name:?}"
            )));
        }
        let value = load_tree_value(ar)?;
        set.set(&name, value)
            .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
    }
    Ok(set)
}

fn load_tree_value(ar: &mut dyn Archive) -> Result<PropertyValue, ArchiveError> {
    match load_kind(ar)? {
        PropertyKind::Array => {
            let len = ar.load_len()?;
            let mut values = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                values.push(load_tree_value(ar)?);
            }
            Ok(PropertyValue::Array(values))
        }
        PropertyKind::Set => Ok(PropertyValue::Set(load_tree(ar)?)),
        scalar => load_scalar(ar, scalar),
    }
}
