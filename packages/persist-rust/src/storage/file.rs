//! File-backed storages.
//!
//! [`ArchiveFileStorage`] keeps a sequence of archived records in one file,
//! either as length-prefixed binary frames or as JSON lines.
//! [`DocumentFileStorage`] holds a single text document.
//!
//! Both write to a `.partial` sibling and rename it over the target when the
//! write completes, so a reader sees either the old file or the new one.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use strata_core::ArchiveEncoding;

use super::{
    ensure_persist, AccessMode, DocumentStore, LogicalLocation, ReadCursor, RecordStream, Storage,
    WriteProgress,
};

const PARTIAL_SUFFIX: &str = "partial";

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

fn create_partial(path: &Path) -> anyhow::Result<(PathBuf, File)> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    let partial = partial_path(path);
    let file = File::create(&partial)
        .with_context(|| format!("creating {}", partial.display()))?;
    Ok((partial, file))
}

fn publish(partial: &Path, path: &Path) -> anyhow::Result<()> {
    fs::rename(partial, path)
        .with_context(|| format!("renaming {} to {}", partial.display(), path.display()))
}

/// Splits a binary archive file into its length-prefixed frames.
fn split_binary_frames(bytes: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let header = bytes
            .get(offset..offset + 4)
            .context("truncated frame header")?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(header);
        let len = u32::from_le_bytes(len_bytes) as usize;
        offset += 4;
        let body = bytes
            .get(offset..offset + len)
            .with_context(|| format!("truncated frame: expected {len} bytes"))?;
        frames.push(body.to_vec());
        offset += len;
    }
    Ok(frames)
}

struct OpenSequence {
    partial: PathBuf,
    writer: BufWriter<File>,
}

/// Record-stream handle over a single archive file.
pub struct ArchiveFileStorage {
    location: LogicalLocation,
    mode: AccessMode,
    encoding: ArchiveEncoding,
    open: Option<OpenSequence>,
    progress: WriteProgress,
    cursor: ReadCursor<Vec<u8>>,
}

impl ArchiveFileStorage {
    pub const NAME: &'static str = "ArchiveFile";

    #[must_use]
    pub fn new(location: LogicalLocation, mode: AccessMode, encoding: ArchiveEncoding) -> Self {
        Self {
            location,
            mode,
            encoding,
            open: None,
            progress: WriteProgress::default(),
            cursor: ReadCursor::new(),
        }
    }

    fn open_sequence(&mut self) -> anyhow::Result<&mut OpenSequence> {
        self.open
            .as_mut()
            .with_context(|| format!("no write sequence is open at {}", self.location))
    }
}

impl Storage for ArchiveFileStorage {
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

impl RecordStream for ArchiveFileStorage {
    fn encoding(&self) -> ArchiveEncoding {
        self.encoding
    }

    fn open_write(&mut self) -> anyhow::Result<()> {
        ensure_persist(self.mode, &self.location)?;
        let (partial, file) = create_partial(&self.location.to_path())?;
        self.open = Some(OpenSequence {
            partial,
            writer: BufWriter::new(file),
        });
        self.progress.open();
        Ok(())
    }

    fn frames_written(&self) -> Option<usize> {
        self.progress.written()
    }

    fn append_frame(&mut self, frame: Vec<u8>) -> anyhow::Result<()> {
        let encoding = self.encoding;
        let sequence = self.open_sequence()?;
        match encoding {
            ArchiveEncoding::Binary => {
                let len = u32::try_from(frame.len()).context("frame larger than 4 GiB")?;
                sequence.writer.write_all(&len.to_le_bytes())?;
                sequence.writer.write_all(&frame)?;
            }
            ArchiveEncoding::Text => {
                sequence.writer.write_all(&frame)?;
                sequence.writer.write_all(b"\n")?;
            }
        }
        self.progress.record();
        Ok(())
    }

    fn close_write(&mut self) -> anyhow::Result<()> {
        let sequence = self
            .open
            .take()
            .with_context(|| format!("no write sequence is open at {}", self.location))?;
        let file = sequence
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing {}: {}", sequence.partial.display(), e.error()))?;
        file.sync_all()?;
        publish(&sequence.partial, &self.location.to_path())?;
        self.progress.close();
        Ok(())
    }

    fn load_frames(&mut self) -> anyhow::Result<Vec<Vec<u8>>> {
        let path = self.location.to_path();
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        match self.encoding {
            ArchiveEncoding::Binary => split_binary_frames(&bytes),
            ArchiveEncoding::Text => Ok(bytes
                .split(|b| *b == b'\n')
                .filter(|line| !line.is_empty())
                .map(<[u8]>::to_vec)
                .collect()),
        }
    }

    fn read_cursor(&mut self) -> &mut ReadCursor<Vec<u8>> {
        &mut self.cursor
    }
}

/// Single-document handle over a text file.
pub struct DocumentFileStorage {
    location: LogicalLocation,
    mode: AccessMode,
    cursor: ReadCursor<String>,
}

impl DocumentFileStorage {
    pub const NAME: &'static str = "DocumentFile";

    #[must_use]
    pub fn new(location: LogicalLocation, mode: AccessMode) -> Self {
        Self {
            location,
            mode,
            cursor: ReadCursor::new(),
        }
    }
}

impl Storage for DocumentFileStorage {
    fn storage_name(&self) -> &'static str {
        Self::NAME
    }

    fn location(&self) -> &LogicalLocation {
        &self.location
    }

    fn access_mode(&self) -> AccessMode {
        self.mode
    }

    fn as_document(&mut self) -> Option<&mut dyn DocumentStore> {
        Some(self)
    }
}

impl DocumentStore for DocumentFileStorage {
    fn exists(&self) -> bool {
        self.location.to_path().is_file()
    }

    fn write_document(&mut self, text: &str) -> anyhow::Result<()> {
        ensure_persist(self.mode, &self.location)?;
        let path = self.location.to_path();
        let (partial, mut file) = create_partial(&path)?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        publish(&partial, &path)
    }

    fn read_document(&mut self) -> anyhow::Result<String> {
        let path = self.location.to_path();
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
    }

    fn read_cursor(&mut self) -> &mut ReadCursor<String> {
        &mut self.cursor
    }
}
