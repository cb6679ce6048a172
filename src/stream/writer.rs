//! Crash-safe incremental writing.
//!
//! The streaming writer emits the magic line and metadata up front, then
//! one section per [`StreamWriter::write_section`] call with an fsync
//! behind each one. The index and checksum land in a trailing block at
//! [`StreamWriter::close`] (FORMAT.md §7). A writer dropped without close
//! leaves a valid, index-less file that [`StreamWriter::append`] can
//! recover.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use crate::document::{validate_section_name, Document, DocumentError};
use crate::format::{
    escape_content, EOF_MARKER, FORMAT_VERSION, MAGIC, MAX_SECTIONS, SECTION_PREFIX, STREAM_FLAG,
    TRAILING_INDEX_SECTION,
};
use crate::writer::meta_block;

use super::errors::{StreamError, StreamResult};
use super::recovery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Closed,
}

/// Incremental writer for streamed PFM files.
///
/// Byte positions are tracked internally, so offsets in the trailing
/// index never depend on querying the file.
pub struct StreamWriter {
    path: PathBuf,
    file: File,
    sections: Vec<(String, u64, u64)>,
    hasher: Sha256,
    position: u64,
    state: StreamState,
}

impl StreamWriter {
    /// Creates a new streamed file, truncating any existing one. The
    /// magic line and `meta`'s metadata fields are written and fsynced
    /// immediately; `meta`'s sections are ignored.
    ///
    /// No checksum is emitted in the header: the real digest is only
    /// known at close and lands in the trailing index, where the lazy
    /// reader picks it up.
    pub fn create<P: AsRef<Path>>(path: P, meta: &Document) -> StreamResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                StreamError::Io(format!("Failed to create {}: {}", path.display(), e))
            })?;

        let mut writer = StreamWriter {
            path: path.to_path_buf(),
            file,
            sections: Vec::new(),
            hasher: Sha256::new(),
            position: 0,
            state: StreamState::Open,
        };

        let mut header = format!("{}/{}:{}\n", MAGIC, FORMAT_VERSION, STREAM_FLAG);
        header.push_str(&meta_block(meta, None));
        writer.write_bytes(header.as_bytes())?;
        writer.sync()?;
        Ok(writer)
    }

    /// Reopens an existing streamed file for appending. The file is
    /// recovered first: a backup copy lands at `<path>.bak`, any stale
    /// trailing index is dropped, and the section list and running
    /// checksum are rebuilt from the surviving bytes.
    pub fn append<P: AsRef<Path>>(path: P) -> StreamResult<Self> {
        let path = path.as_ref();
        let recovered = recovery::recover(path)?;
        Ok(StreamWriter {
            path: path.to_path_buf(),
            file: recovered.file,
            sections: recovered.sections,
            hasher: recovered.hasher,
            position: recovered.position,
            state: StreamState::Open,
        })
    }

    /// Appends one section and fsyncs. Every call is independently
    /// durable: after it returns, a crash cannot lose this section.
    pub fn write_section(&mut self, name: &str, content: &str) -> StreamResult<()> {
        if self.state == StreamState::Closed {
            return Err(StreamError::WriterClosed);
        }
        validate_section_name(name)?;
        if self.sections.len() >= MAX_SECTIONS {
            return Err(DocumentError::TooManySections(MAX_SECTIONS).into());
        }

        let header = format!("{}{}\n", SECTION_PREFIX, name);
        let mut body = escape_content(content);
        body.push('\n');

        self.write_bytes(header.as_bytes())?;
        let offset = self.position;
        self.write_bytes(body.as_bytes())?;
        self.sections.push((name.to_string(), offset, body.len() as u64));
        // The checksum protocol covers original content, not its escaped
        // on-disk form.
        self.hasher.update(content.as_bytes());
        self.sync()?;
        debug!("section {:?} durable at offset {}", name, offset);
        Ok(())
    }

    /// Writes the trailing index block, checksum, and EOF offset marker,
    /// then closes the stream. Idempotent: a second close is a no-op.
    pub fn close(&mut self) -> StreamResult<()> {
        if self.state == StreamState::Closed {
            return Ok(());
        }
        let index_offset = self.position;
        let mut block = format!("{}{}\n", SECTION_PREFIX, TRAILING_INDEX_SECTION);
        for (name, offset, length) in &self.sections {
            block.push_str(&format!("{} {} {}\n", name, offset, length));
        }
        block.push_str(&format!(
            "checksum {}\n",
            hex::encode(self.hasher.clone().finalize())
        ));
        block.push_str(&format!("{}:{}\n", EOF_MARKER, index_offset));

        self.write_bytes(block.as_bytes())?;
        self.sync()?;
        self.state = StreamState::Closed;
        debug!(
            "closed {} with {} section(s), index at byte {}",
            self.path.display(),
            self.sections.len(),
            index_offset
        );
        Ok(())
    }

    /// Number of sections written or recovered so far.
    pub fn sections_written(&self) -> usize {
        self.sections.len()
    }

    /// Bytes in the file so far.
    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_bytes(&mut self, data: &[u8]) -> StreamResult<()> {
        self.file.write_all(data).map_err(|e| {
            StreamError::Io(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn sync(&self) -> StreamResult<()> {
        self.file.sync_all().map_err(|e| {
            StreamError::Io(format!("fsync failed for {}: {}", self.path.display(), e))
        })
    }
}
