//! Shared write sequencing and read state handling for formatters.
//!
//! Every formatter, built-in or not, drives storages the same way: pick a
//! capability, check the iteration against what the handle has already
//! seen, and move the handle's read cursor through
//! `NotStarted → InProgress → Exhausted`. These helpers own that logic so a
//! formatter only has to turn its objects into frames, rows or text.

use strata_core::{
    ArchiveError, ArchiveRecord, Persistable, Policy, PropertySet, PropertyValue, TokenArchive,
};
use tracing::trace;

use super::ReadProgress;
use crate::error::{PersistenceError, ReadMisuse, Result};
use crate::storage::{ReadCursor, ReadState, Storage};

/// Additional-data key naming the table a row store call targets.
pub const TABLE_NAME_KEY: &str = "tableName";
/// Additional-data key naming the row an update targets.
pub const ITEM_ID_KEY: &str = "itemId";

/// Capability a storage offers, checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    RecordStream,
    RowStore,
    Document,
    None,
}

#[must_use]
pub fn capability(storage: &mut dyn Storage) -> Capability {
    if storage.as_record_stream().is_some() {
        Capability::RecordStream
    } else if storage.as_row_store().is_some() {
        Capability::RowStore
    } else if storage.as_document().is_some() {
        Capability::Document
    } else {
        Capability::None
    }
}

// ---------------------------------------------------------------------------
// Error context
// ---------------------------------------------------------------------------

/// Storage identity captured before a capability borrow, for error reports.
#[derive(Debug, Clone)]
pub struct Site {
    pub storage: &'static str,
    pub location: String,
}

impl Site {
    #[must_use]
    pub fn of(storage: &dyn Storage) -> Self {
        Self {
            storage: storage.storage_name(),
            location: storage.location().to_string(),
        }
    }

    #[must_use]
    pub fn backend(&self, source: anyhow::Error) -> PersistenceError {
        PersistenceError::Storage {
            storage: self.storage,
            location: self.location.clone(),
            source,
        }
    }

    #[must_use]
    pub fn unsupported(&self, type_tag: &str, operation: &'static str) -> PersistenceError {
        PersistenceError::UnsupportedStorage {
            type_tag: type_tag.to_string(),
            operation,
            storage: self.storage,
            location: self.location.clone(),
        }
    }

    #[must_use]
    pub fn not_found(&self, type_tag: &str, key: impl Into<String>) -> PersistenceError {
        PersistenceError::NotFound {
            type_tag: type_tag.to_string(),
            storage: self.storage,
            location: self.location.clone(),
            key: key.into(),
        }
    }

    fn misuse(&self, misuse: ReadMisuse) -> PersistenceError {
        PersistenceError::ReadProtocol {
            storage: self.storage,
            location: self.location.clone(),
            misuse,
        }
    }

    fn sequence(&self, iteration: usize, total: usize, reason: &'static str) -> PersistenceError {
        PersistenceError::InvalidSequence {
            location: self.location.clone(),
            iteration,
            total,
            reason,
        }
    }

    fn check_bounds(&self, iteration: usize, total: usize) -> Result<()> {
        if total == 0 {
            return Err(self.sequence(iteration, total, "total count is zero"));
        }
        if iteration >= total {
            return Err(self.sequence(iteration, total, "iteration beyond total count"));
        }
        Ok(())
    }

    /// Validates `iteration` against the records already written in the
    /// open sequence. Returns `true` when a new sequence must be opened.
    fn check_position(&self, iteration: usize, total: usize, written: Option<usize>) -> Result<bool> {
        self.check_bounds(iteration, total)?;
        match (iteration, written) {
            (0, _) => Ok(true),
            (_, None) => Err(self.sequence(iteration, total, "no sequence is open")),
            (i, Some(n)) if i == n => Ok(false),
            _ => Err(self.sequence(iteration, total, "iteration out of order")),
        }
    }

    /// Applies one read call to the cursor state. Returns `true` when the
    /// caller must load the records and start the cursor.
    fn begin_read(&self, state: ReadState, first: bool) -> Result<bool> {
        match (state, first) {
            (ReadState::NotStarted, true) => Ok(true),
            (ReadState::NotStarted, false) => Err(self.misuse(ReadMisuse::NotStarted)),
            (ReadState::InProgress, true) => Err(self.misuse(ReadMisuse::AlreadyStarted)),
            (ReadState::InProgress, false) => Ok(false),
            (ReadState::Exhausted, _) => Err(self.misuse(ReadMisuse::Exhausted)),
        }
    }
}

fn take_next<T>(
    cursor: &mut ReadCursor<T>,
    site: &Site,
    type_tag: &str,
) -> Result<(T, ReadProgress)> {
    let index_hint = cursor.remaining();
    let record = cursor
        .advance()
        .ok_or_else(|| site.not_found(type_tag, format!("record {index_hint}")))?;
    let progress = if cursor.state() == ReadState::Exhausted {
        ReadProgress::Exhausted
    } else {
        ReadProgress::More
    };
    Ok((record, progress))
}

// ---------------------------------------------------------------------------
// Record streams
// ---------------------------------------------------------------------------

/// Encodes `record` with the stream's encoding and appends it as record
/// `iteration` of `total`.
///
/// # Errors
///
/// `UnsupportedStorage` if `storage` is not a record stream,
/// `InvalidSequence`, `Serialization` for encoding failures and `Storage`
/// for backend failures.
pub fn append_record(
    storage: &mut dyn Storage,
    record: &ArchiveRecord,
    iteration: usize,
    total: usize,
) -> Result<()> {
    let site = Site::of(storage);
    let stream = storage
        .as_record_stream()
        .ok_or_else(|| site.unsupported(&record.type_tag, "write"))?;
    let open = site.check_position(iteration, total, stream.frames_written())?;
    let frame = record
        .encode(stream.encoding())
        .map_err(|e| PersistenceError::archive(&record.type_tag, e))?;

    if open {
        stream.open_write().map_err(|e| site.backend(e))?;
    }
    stream.append_frame(frame).map_err(|e| site.backend(e))?;
    trace!(location = %site.location, iteration, total, "appended frame");
    if iteration + 1 == total {
        stream.close_write().map_err(|e| site.backend(e))?;
    }
    Ok(())
}

/// Decodes the next record of `type_tag` from a record stream.
///
/// # Errors
///
/// `UnsupportedStorage`, `ReadProtocol`, `NotFound` for an empty
/// container, `Serialization` for undecodable frames or a record of a
/// different type, and `Storage` for backend failures.
pub fn next_record(
    storage: &mut dyn Storage,
    type_tag: &str,
    first: bool,
) -> Result<(ArchiveRecord, ReadProgress)> {
    let site = Site::of(storage);
    let stream = storage
        .as_record_stream()
        .ok_or_else(|| site.unsupported(type_tag, "read"))?;
    if site.begin_read(stream.read_cursor().state(), first)? {
        let frames = stream.load_frames().map_err(|e| site.backend(e))?;
        stream.read_cursor().start(frames);
    }
    let (frame, progress) = take_next(stream.read_cursor(), &site, type_tag)?;
    let record = ArchiveRecord::decode(stream.encoding(), &frame)
        .map_err(|e| PersistenceError::archive(type_tag, e))?;
    if record.type_tag != type_tag {
        return Err(PersistenceError::serialization(
            type_tag,
            format!("stored record holds a {}", record.type_tag),
        ));
    }
    Ok((record, progress))
}

/// Runs `save` against a fresh saving archive and wraps the fields.
///
/// # Errors
///
/// `Serialization` for any archive failure raised by `save`.
pub fn archive_with(
    type_tag: &str,
    version: u32,
    save: impl FnOnce(&mut TokenArchive) -> std::result::Result<(), ArchiveError>,
) -> Result<ArchiveRecord> {
    let mut archive = TokenArchive::saving();
    save(&mut archive).map_err(|e| PersistenceError::archive(type_tag, e))?;
    Ok(ArchiveRecord {
        type_tag: type_tag.to_string(),
        version,
        tokens: archive.into_tokens(),
    })
}

/// Replays `record` through `load` and checks every field was consumed.
///
/// # Errors
///
/// `Serialization` for any archive failure, including trailing fields.
pub fn unarchive_with<T>(
    record: ArchiveRecord,
    load: impl FnOnce(&mut TokenArchive, u32) -> std::result::Result<T, ArchiveError>,
) -> Result<T> {
    let mut archive = TokenArchive::loading(record.tokens);
    let value = load(&mut archive, record.version)
        .and_then(|value| archive.finish().map(|()| value))
        .map_err(|e| PersistenceError::archive(&record.type_tag, e))?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Row stores
// ---------------------------------------------------------------------------

/// Table a row store call targets: the additional data wins over the
/// policy, which wins over `default`.
#[must_use]
pub fn table_name(additional_data: &PropertySet, policy: &Policy, default: &str) -> String {
    additional_data
        .get_string(TABLE_NAME_KEY)
        .or_else(|| policy.get_string(TABLE_NAME_KEY))
        .unwrap_or(default)
        .to_string()
}

/// Row key from the additional data. Strings are used as-is, integers are
/// rendered in decimal.
#[must_use]
pub fn item_id(additional_data: &PropertySet) -> Option<String> {
    match additional_data.get(ITEM_ID_KEY)? {
        PropertyValue::String(s) => Some(s.clone()),
        PropertyValue::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// # Errors
///
/// `MissingMetadata` when no usable item id is present.
pub fn require_item_id(additional_data: &PropertySet) -> Result<String> {
    item_id(additional_data).ok_or_else(|| PersistenceError::MissingMetadata {
        key: ITEM_ID_KEY.to_string(),
    })
}

/// Stages `row` as record `iteration` of `total` into `table`, committing
/// the batch after the last one.
///
/// # Errors
///
/// `UnsupportedStorage`, `InvalidSequence` and `Storage`.
pub fn stage_row(
    storage: &mut dyn Storage,
    type_tag: &str,
    table: &str,
    key: Option<String>,
    row: PropertySet,
    iteration: usize,
    total: usize,
) -> Result<()> {
    let site = Site::of(storage);
    let rows = storage
        .as_row_store()
        .ok_or_else(|| site.unsupported(type_tag, "write"))?;
    if site.check_position(iteration, total, rows.staged_rows())? {
        rows.begin_batch(table).map_err(|e| site.backend(e))?;
    }
    rows.stage_row(key, row).map_err(|e| site.backend(e))?;
    trace!(location = %site.location, table, iteration, total, "staged row");
    if iteration + 1 == total {
        rows.commit_batch().map_err(|e| site.backend(e))?;
    }
    Ok(())
}

/// Takes the next row of `table`.
///
/// # Errors
///
/// `UnsupportedStorage`, `ReadProtocol`, `NotFound` for an empty table and
/// `Storage`.
pub fn next_row(
    storage: &mut dyn Storage,
    type_tag: &str,
    table: &str,
    first: bool,
) -> Result<(PropertySet, ReadProgress)> {
    let site = Site::of(storage);
    let rows = storage
        .as_row_store()
        .ok_or_else(|| site.unsupported(type_tag, "read"))?;
    if site.begin_read(rows.read_cursor().state(), first)? {
        let loaded = rows.load_rows(table).map_err(|e| site.backend(e))?;
        rows.read_cursor().start(loaded);
    }
    take_next(rows.read_cursor(), &site, type_tag)
}

/// Replaces the row stored under `key`.
///
/// # Errors
///
/// `NotFound` if the row does not exist, plus `UnsupportedStorage` and
/// `Storage`.
pub fn replace_row(
    storage: &mut dyn Storage,
    type_tag: &str,
    table: &str,
    key: &str,
    row: PropertySet,
) -> Result<()> {
    let site = Site::of(storage);
    let rows = storage
        .as_row_store()
        .ok_or_else(|| site.unsupported(type_tag, "update"))?;
    if rows.update_row(table, key, row).map_err(|e| site.backend(e))? {
        Ok(())
    } else {
        Err(site.not_found(type_tag, key))
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Writes the whole document. A document holds exactly one object, so
/// `total` must be 1.
///
/// # Errors
///
/// `UnsupportedStorage`, `InvalidSequence` and `Storage`.
pub fn write_document(
    storage: &mut dyn Storage,
    type_tag: &str,
    text: &str,
    iteration: usize,
    total: usize,
) -> Result<()> {
    let site = Site::of(storage);
    site.check_bounds(iteration, total)?;
    if total != 1 {
        return Err(site.sequence(iteration, total, "a document holds a single object"));
    }
    let document = storage
        .as_document()
        .ok_or_else(|| site.unsupported(type_tag, "write"))?;
    document.write_document(text).map_err(|e| site.backend(e))
}

/// Reads the document text. The progress is always [`ReadProgress::Single`].
///
/// # Errors
///
/// `UnsupportedStorage`, `ReadProtocol`, `NotFound` if the document does
/// not exist and `Storage`.
pub fn read_document(
    storage: &mut dyn Storage,
    type_tag: &str,
    first: bool,
) -> Result<(String, ReadProgress)> {
    let site = Site::of(storage);
    let document = storage
        .as_document()
        .ok_or_else(|| site.unsupported(type_tag, "read"))?;
    if site.begin_read(document.read_cursor().state(), first)? {
        if !document.exists() {
            return Err(site.not_found(type_tag, "document"));
        }
        let text = document.read_document().map_err(|e| site.backend(e))?;
        document.read_cursor().start(vec![text]);
    }
    let (text, _) = take_next(document.read_cursor(), &site, type_tag)?;
    Ok((text, ReadProgress::Single))
}

/// Rewrites an existing document.
///
/// # Errors
///
/// `NotFound` if the document does not exist, `UnsupportedStorage` and
/// `Storage`.
pub fn replace_document(storage: &mut dyn Storage, type_tag: &str, text: &str) -> Result<()> {
    let site = Site::of(storage);
    let document = storage
        .as_document()
        .ok_or_else(|| site.unsupported(type_tag, "update"))?;
    if !document.exists() {
        return Err(site.not_found(type_tag, "document"));
    }
    document.write_document(text).map_err(|e| site.backend(e))
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Downcasts `object` to the type a formatter handles.
///
/// # Errors
///
/// `Serialization` naming both tags when the run-time type differs.
pub fn expect_object<'a, T: Persistable>(
    object: &'a dyn Persistable,
    type_tag: &str,
) -> Result<&'a T> {
    object.downcast_ref::<T>().ok_or_else(|| {
        PersistenceError::serialization(
            type_tag,
            format!("cannot handle an object of type {}", object.type_tag()),
        )
    })
}

/// Mutable counterpart of [`expect_object`].
///
/// # Errors
///
/// `Serialization` naming both tags when the run-time type differs.
pub fn expect_object_mut<'a, T: Persistable>(
    object: &'a mut dyn Persistable,
    type_tag: &str,
) -> Result<&'a mut T> {
    let found = object.type_tag();
    object.downcast_mut::<T>().ok_or_else(|| {
        PersistenceError::serialization(
            type_tag,
            format!("cannot handle an object of type {found}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_core::Token;

    use super::*;
    use crate::storage::{
        AccessMode, Database, LogicalLocation, MemoryStorage, MemoryVault, TableStorage,
    };

    fn record(n: u32) -> ArchiveRecord {
        ArchiveRecord {
            type_tag: "Counter".to_string(),
            version: 1,
            tokens: vec![Token::U32(n)],
        }
    }

    fn memory(vault: &Arc<MemoryVault>, mode: AccessMode) -> MemoryStorage {
        MemoryStorage::new(Arc::clone(vault), LogicalLocation::new("counters"), mode)
    }

    #[test]
    fn sequence_publishes_after_last_iteration() {
        let vault = Arc::new(MemoryVault::new());
        let mut storage = memory(&vault, AccessMode::Persist);
        append_record(&mut storage, &record(0), 0, 2).unwrap();
        assert!(!vault.contains("counters"));
        append_record(&mut storage, &record(1), 1, 2).unwrap();
        assert_eq!(vault.frame_count("counters"), Some(2));
    }

    #[test]
    fn out_of_order_iteration_is_rejected() {
        let vault = Arc::new(MemoryVault::new());
        let mut storage = memory(&vault, AccessMode::Persist);
        let err = append_record(&mut storage, &record(1), 1, 3).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::InvalidSequence { reason: "no sequence is open", .. }
        ));

        append_record(&mut storage, &record(0), 0, 3).unwrap();
        let err = append_record(&mut storage, &record(2), 2, 3).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::InvalidSequence { reason: "iteration out of order", .. }
        ));
        let err = append_record(&mut storage, &record(0), 3, 3).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidSequence { iteration: 3, .. }));
    }

    #[test]
    fn read_walks_cursor_states() {
        let vault = Arc::new(MemoryVault::new());
        let mut out = memory(&vault, AccessMode::Persist);
        append_record(&mut out, &record(7), 0, 2).unwrap();
        append_record(&mut out, &record(8), 1, 2).unwrap();

        let mut input = memory(&vault, AccessMode::Retrieve);
        let err = next_record(&mut input, "Counter", false).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::ReadProtocol { misuse: ReadMisuse::NotStarted, .. }
        ));

        let (first, progress) = next_record(&mut input, "Counter", true).unwrap();
        assert_eq!(first, record(7));
        assert_eq!(progress, ReadProgress::More);

        let err = next_record(&mut input, "Counter", true).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::ReadProtocol { misuse: ReadMisuse::AlreadyStarted, .. }
        ));

        let (second, progress) = next_record(&mut input, "Counter", false).unwrap();
        assert_eq!(second, record(8));
        assert_eq!(progress, ReadProgress::Exhausted);

        let err = next_record(&mut input, "Counter", false).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::ReadProtocol { misuse: ReadMisuse::Exhausted, .. }
        ));
    }

    #[test]
    fn foreign_record_type_is_a_serialization_error() {
        let vault = Arc::new(MemoryVault::new());
        let mut out = memory(&vault, AccessMode::Persist);
        append_record(&mut out, &record(1), 0, 1).unwrap();

        let mut input = memory(&vault, AccessMode::Retrieve);
        let err = next_record(&mut input, "PropertySet", true).unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization { .. }));
    }

    #[test]
    fn rows_need_a_row_store() {
        let vault = Arc::new(MemoryVault::new());
        let mut storage = memory(&vault, AccessMode::Persist);
        let err = stage_row(&mut storage, "X", "t", None, PropertySet::new(), 0, 1).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedStorage { operation: "write", storage: "Memory", .. }
        ));
    }

    #[test]
    fn replace_missing_row_is_not_found() {
        let db = Arc::new(Database::new());
        let mut storage = TableStorage::new(db, LogicalLocation::new("db"), AccessMode::Persist);
        stage_row(&mut storage, "X", "t", Some("a".into()), PropertySet::new(), 0, 1).unwrap();
        replace_row(&mut storage, "X", "t", "a", PropertySet::new()).unwrap();
        let err = replace_row(&mut storage, "X", "t", "b", PropertySet::new()).unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { key, .. } if key == "b"));
    }

    #[test]
    fn empty_container_is_not_found() {
        let site = Site {
            storage: "Memory",
            location: "empty".to_string(),
        };
        let mut cursor: ReadCursor<Vec<u8>> = ReadCursor::new();
        cursor.start(Vec::new());
        let err = take_next(&mut cursor, &site, "Counter").unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { storage: "Memory", .. }));
        assert_eq!(cursor.state(), ReadState::Exhausted);
    }

    #[test]
    fn single_row_read_is_done() {
        let db = Arc::new(Database::new());
        let mut out = TableStorage::new(Arc::clone(&db), LogicalLocation::new("db"), AccessMode::Persist);
        stage_row(&mut out, "X", "t", None, PropertySet::new(), 0, 1).unwrap();
        let mut input = TableStorage::new(db, LogicalLocation::new("db"), AccessMode::Retrieve);
        let (row, progress) = next_row(&mut input, "X", "t", true).unwrap();
        assert!(row.is_empty());
        assert!(progress.is_done());
    }

    #[test]
    fn table_name_precedence() {
        let policy = Policy::from_json_str(r#"{"tableName": "fromPolicy"}"#).unwrap();
        let mut data = PropertySet::new();
        assert_eq!(table_name(&data, &Policy::empty(), "Default"), "Default");
        assert_eq!(table_name(&data, &policy, "Default"), "fromPolicy");
        data.set(TABLE_NAME_KEY, "fromCall").unwrap();
        assert_eq!(table_name(&data, &policy, "Default"), "fromCall");
    }

    #[test]
    fn item_id_accepts_strings_and_ints() {
        let mut data = PropertySet::new();
        assert!(matches!(
            require_item_id(&data),
            Err(PersistenceError::MissingMetadata { .. })
        ));
        data.set(ITEM_ID_KEY, 12_i64).unwrap();
        assert_eq!(item_id(&data).as_deref(), Some("12"));
        data.set(ITEM_ID_KEY, "visit-3").unwrap();
        assert_eq!(require_item_id(&data).unwrap(), "visit-3");
    }

    #[test]
    fn unarchive_rejects_trailing_fields() {
        let rec = ArchiveRecord {
            type_tag: "Counter".to_string(),
            version: 1,
            tokens: vec![Token::U32(1), Token::U32(2)],
        };
        let err = unarchive_with(rec, |ar, _| {
            let ar: &mut dyn strata_core::Archive = ar;
            ar.load_u32()
        })
        .unwrap_err();
        assert!(matches!(err, PersistenceError::Serialization { .. }));
    }
}
