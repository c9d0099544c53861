//! In-memory archive backend.
//!
//! [`MemoryVault`] holds published archives keyed by location and is shared
//! by every [`MemoryStorage`] handle opened on it. A handle stages frames
//! privately and publishes them on `close_write`, so readers never observe a
//! half-written sequence.

use std::sync::Arc;

use dashmap::DashMap;
use strata_core::ArchiveEncoding;

use super::{ensure_persist, AccessMode, LogicalLocation, ReadCursor, RecordStream, Storage, WriteProgress};

/// Published in-memory archives, keyed by location string.
#[derive(Debug, Default)]
pub struct MemoryVault {
    archives: DashMap<String, Arc<Vec<Vec<u8>>>>,
}

impl MemoryVault {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames published at `location`, if any.
    #[must_use]
    pub fn frame_count(&self, location: &str) -> Option<usize> {
        self.archives.get(location).map(|frames| frames.len())
    }

    #[must_use]
    pub fn contains(&self, location: &str) -> bool {
        self.archives.contains_key(location)
    }

    pub fn remove(&self, location: &str) -> bool {
        self.archives.remove(location).is_some()
    }

    fn publish(&self, location: &str, frames: Vec<Vec<u8>>) {
        self.archives.insert(location.to_string(), Arc::new(frames));
    }

    fn load(&self, location: &str) -> Option<Arc<Vec<Vec<u8>>>> {
        self.archives.get(location).map(|frames| Arc::clone(frames.value()))
    }
}

/// Record-stream handle over a [`MemoryVault`] entry.
pub struct MemoryStorage {
    vault: Arc<MemoryVault>,
    location: LogicalLocation,
    mode: AccessMode,
    encoding: ArchiveEncoding,
    staged: Vec<Vec<u8>>,
    progress: WriteProgress,
    cursor: ReadCursor<Vec<u8>>,
}

impl MemoryStorage {
    pub const NAME: &'static str = "Memory";

    #[must_use]
    pub fn new(vault: Arc<MemoryVault>, location: LogicalLocation, mode: AccessMode) -> Self {
        Self {
            vault,
            location,
            mode,
            encoding: ArchiveEncoding::Binary,
            staged: Vec::new(),
            progress: WriteProgress::default(),
            cursor: ReadCursor::new(),
        }
    }

    /// Switches the frame encoding (binary by default).
    #[must_use]
    pub fn with_encoding(mut self, encoding: ArchiveEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

impl Storage for MemoryStorage {
    fn storage_name(&self) -> &'static str {
        Self::NAME
    }

    fn location(&self) -> &LogicalLocation {
        &self.location
    }

    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn as_record_stream(&mut self) -> Option<&mut dyn RecordStream> {
        Some(self)
    }
}

impl RecordStream for MemoryStorage {
    fn encoding(&self) -> ArchiveEncoding {
        self.encoding
    }

    fn open_write(&mut self) -> anyhow::Result<()> {
        ensure_persist(self.mode, &self.location)?;
        self.staged.clear();
        self.progress.open();
        Ok(())
    }

    fn frames_written(&self) -> Option<usize> {
        self.progress.written()
    }

    fn append_frame(&mut self, frame: Vec<u8>) -> anyhow::Result<()> {
        if self.progress.written().is_none() {
            anyhow::bail!("no write sequence is open at {}", self.location);
        }
        self.staged.push(frame);
        self.progress.record();
        Ok(())
    }

    fn close_write(&mut self) -> anyhow::Result<()> {
        if self.progress.written().is_none() {
            anyhow::bail!("no write sequence is open at {}", self.location);
        }
        self.vault
            .publish(self.location.as_str(), std::mem::take(&mut self.staged));
        self.progress.close();
        Ok(())
    }

    fn load_frames(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
        self.vault
            .load(self.location.as_str())
            .map(|frames| frames.as_ref().clone())
            .ok_or_else(|| anyhow::anyhow!("no archive published at {}", self.location))
    }

    fn read_cursor(&mut self) -> &mut ReadCursor<Vec<u8>> {
        &mut self.cursor
    }
}
