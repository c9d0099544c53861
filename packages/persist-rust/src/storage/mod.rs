//! Storage handles and the backends shipped with this crate.
//!
//! A [`Storage`] is an open destination or source. It is opaque to the
//! dispatch layer: formatters ask it for one of three capabilities and
//! report [`UnsupportedStorage`](crate::PersistenceError::UnsupportedStorage)
//! when the backend offers none they can use.
//!
//! - [`RecordStream`]: an ordered container of archived records
//!   ([`MemoryStorage`], [`ArchiveFileStorage`])
//! - [`RowStore`]: named tables of keyed rows ([`TableStorage`])
//! - [`DocumentStore`]: a single text document ([`DocumentFileStorage`])
//!
//! Backend methods return `anyhow::Result`; the formatter wraps failures in
//! [`PersistenceError::Storage`](crate::PersistenceError::Storage) with the
//! backend error kept as the source.

pub mod cursor;
pub mod file;
pub mod location;
pub mod memory;
pub mod registry;
pub mod table;

pub use cursor::{ReadCursor, ReadState, WriteProgress};
pub use file::{ArchiveFileStorage, DocumentFileStorage};
pub use location::LogicalLocation;
pub use memory::{MemoryStorage, MemoryVault};
pub use registry::{storage_factory, StorageFactory, StorageRegistry, TEXT_ARCHIVE_FILE};
pub use table::{Database, TableStorage};

use strata_core::{ArchiveEncoding, PropertySet};

/// Whether a handle was opened to persist or to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Persist,
    Retrieve,
}

/// An open backend resource. Borrowed by a formatter for one call at a time.
pub trait Storage: Send {
    /// Backend identity used in logs and errors.
    fn storage_name(&self) -> &'static str;

    fn location(&self) -> &LogicalLocation;

    fn access_mode(&self) -> AccessMode;

    fn as_record_stream(&mut self) -> Option<&mut dyn RecordStream> {
        None
    }

    fn as_row_store(&mut self) -> Option<&mut dyn RowStore> {
        None
    }

    fn as_document(&mut self) -> Option<&mut dyn DocumentStore> {
        None
    }
}

/// Ordered container of encoded records.
///
/// A write sequence is `open_write`, one `append_frame` per record, then
/// `close_write`; records become readable once the sequence is closed.
pub trait RecordStream {
    /// Encoding the formatter must use for frames in this container.
    fn encoding(&self) -> ArchiveEncoding;

    /// Starts a new sequence, discarding any previous content.
    ///
    /// # Errors
    ///
    /// Backend failure, or the handle was opened for retrieval.
    fn open_write(&mut self) -> anyhow::Result<()>;

    /// Frames appended since `open_write`, or `None` if no sequence is open.
    fn frames_written(&self) -> Option<usize>;

    /// # Errors
    ///
    /// Backend failure, or no sequence is open.
    fn append_frame(&mut self, frame: Vec<u8>) -> anyhow::Result<()>;

    /// Publishes the sequence.
    ///
    /// # Errors
    ///
    /// Backend failure, or no sequence is open.
    fn close_write(&mut self) -> anyhow::Result<()>;

    /// Loads every published frame in write order.
    ///
    /// # Errors
    ///
    /// Backend failure, e.g. the container does not exist.
    fn load_frames(&mut self) -> anyhow::Result<Vec<Vec<u8>>>;

    fn read_cursor(&mut self) -> &mut ReadCursor<Vec<u8>>;
}

/// Tables of rows keyed by string ids, in insertion order.
///
/// Writes are staged in a batch and committed together; updates apply
/// immediately to a single existing row.
pub trait RowStore {
    /// Starts staging rows for `table`.
    ///
    /// # Errors
    ///
    /// Backend failure, or the handle was opened for retrieval.
    fn begin_batch(&mut self, table: &str) -> anyhow::Result<()>;

    /// Rows staged since `begin_batch`, or `None` if no batch is open.
    fn staged_rows(&self) -> Option<usize>;

    /// Stages one row. `key` of `None` asks the table to assign one.
    ///
    /// # Errors
    ///
    /// Backend failure, or no batch is open.
    fn stage_row(&mut self, key: Option<String>, row: PropertySet) -> anyhow::Result<()>;

    /// Applies the staged rows atomically.
    ///
    /// # Errors
    ///
    /// Backend rejection (e.g. duplicate key); nothing is applied.
    fn commit_batch(&mut self) -> anyhow::Result<()>;

    /// Replaces the row stored under `key`. Returns `false` if there is none.
    ///
    /// # Errors
    ///
    /// Backend failure.
    fn update_row(&mut self, table: &str, key: &str, row: PropertySet) -> anyhow::Result<bool>;

    /// Loads every row of `table` in insertion order.
    ///
    /// # Errors
    ///
    /// Backend failure, e.g. the table does not exist.
    fn load_rows(&mut self, table: &str) -> anyhow::Result<Vec<PropertySet>>;

    fn read_cursor(&mut self) -> &mut ReadCursor<PropertySet>;
}

/// A single text document with no notion of multiple records.
pub trait DocumentStore {
    fn exists(&self) -> bool;

    /// Replaces the whole document.
    ///
    /// # Errors
    ///
    /// Backend failure, or the handle was opened for retrieval.
    fn write_document(&mut self, text: &str) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Backend failure, e.g. the document does not exist.
    fn read_document(&mut self) -> anyhow::Result<String>;

    fn read_cursor(&mut self) -> &mut ReadCursor<String>;
}

/// Storages an object is persisted to, or retrieved from, in one call.
pub type StorageList = Vec<Box<dyn Storage>>;

/// Shared guard used by backends before mutating.
pub(crate) fn ensure_persist(mode: AccessMode, location: &LogicalLocation) -> anyhow::Result<()> {
    if mode == AccessMode::Retrieve {
        anyhow::bail!("{location} was opened for retrieval and cannot be written");
    }
    Ok(())
}
