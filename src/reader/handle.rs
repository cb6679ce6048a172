//! Lazy indexed access.
//!
//! [`open`] reads only the header region: magic line, metadata block, and
//! any inline index. Section bodies stay on disk until asked for, then
//! one seek and one bounded read fetches them. Streamed files carry their
//! index at the tail instead; the `#!END:<offset>` hint points straight
//! at it, with a bounded window scan as fallback (FORMAT.md §4.2, §6).
//!
//! Every index entry is bounds-checked against the file size before use,
//! so a forged index can name offsets but never read outside the file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::warn;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::document::Document;
use crate::format::{
    unescape_content, EOF_MARKER, INDEX_SECTION, MAX_FILE_SIZE, MAX_META_FIELDS, META_ALLOWLIST,
    META_SECTION, RECOVERY_TAIL_WINDOW, SECTION_PREFIX, TRAILING_INDEX_SECTION,
};

use super::errors::{ReadError, ReadResult};
use super::index::SectionIndex;
use super::parser::{self, normalize_newlines, parse_magic_line};

/// Indexed handle over an open PFM file.
///
/// Holds the file open; nothing beyond the header has been read until a
/// section is requested.
pub struct PfmHandle {
    file: File,
    path: PathBuf,
    file_size: u64,
    /// Header metadata lines, first occurrence wins. For streamed files
    /// the trailing `checksum` line lands here too.
    pub meta: BTreeMap<String, String>,
    pub index: SectionIndex,
    pub format_version: String,
    streamed: bool,
}

/// Opens a PFM file and parses its header and index.
pub fn open<P: AsRef<Path>>(path: P) -> ReadResult<PfmHandle> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| ReadError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let file_size = file
        .metadata()
        .map_err(|e| ReadError::Io(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();
    if file_size > MAX_FILE_SIZE {
        return Err(ReadError::InputTooLarge {
            size: file_size,
            max: MAX_FILE_SIZE,
        });
    }

    let mut handle = PfmHandle {
        file,
        path: path.to_path_buf(),
        file_size,
        meta: BTreeMap::new(),
        index: SectionIndex::new(),
        format_version: String::new(),
        streamed: false,
    };
    handle.parse_header()?;
    Ok(handle)
}

impl PfmHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the magic line carried the `:STREAM` flag.
    pub fn streamed(&self) -> bool {
        self.streamed
    }

    /// Indexed section names, sorted.
    pub fn section_names(&self) -> Vec<&str> {
        self.index.section_names()
    }

    /// Reads the first section with the given name, or `None` when the
    /// index has no entry for it.
    pub fn get_section(&mut self, name: &str) -> ReadResult<Option<String>> {
        match self.index.get(name) {
            Some((offset, length)) => Ok(Some(self.read_entry(offset, length)?)),
            None => Ok(None),
        }
    }

    /// Reads every indexed body for `name`, in file order.
    pub fn get_sections(&mut self, name: &str) -> ReadResult<Vec<String>> {
        let entries: Vec<(u64, u64)> = self.index.get_all(name).to_vec();
        let mut out = Vec::with_capacity(entries.len());
        for (offset, length) in entries {
            out.push(self.read_entry(offset, length)?);
        }
        Ok(out)
    }

    /// Recomputes the content digest from the indexed entries and
    /// compares it with the stored checksum in constant time.
    ///
    /// Entries are visited in file-offset order so the digest matches the
    /// write-order checksum regardless of index layout. `Ok(false)` when
    /// no checksum is stored: absence never validates.
    pub fn validate_checksum(&mut self) -> ReadResult<bool> {
        let expected = match self.meta.get("checksum") {
            Some(value) if !value.is_empty() => value.clone(),
            _ => return Ok(false),
        };
        let mut hasher = Sha256::new();
        for (offset, length) in self.index.entries_by_offset() {
            let raw = self.read_raw(offset, length)?;
            let chunk = String::from_utf8_lossy(&raw);
            hasher.update(decode_chunk(&chunk).as_bytes());
        }
        let actual = hex::encode(hasher.finalize());
        Ok(actual.as_bytes().ct_eq(expected.as_bytes()).into())
    }

    /// Fully parses the underlying file into a [`Document`].
    pub fn to_document(&self) -> ReadResult<Document> {
        parser::read(&self.path)
    }

    /// Reads magic, metadata, and any inline index, stopping at the first
    /// content section header.
    fn parse_header(&mut self) -> ReadResult<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| self.io_error("Failed to seek in", e))?;
        let mut reader = BufReader::new(&self.file);

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| self.io_error("Failed to read", e))?;
        if n == 0 {
            return Err(ReadError::MissingMagic);
        }
        let magic = parse_magic_line(trim_line_end(&line))?;
        self.format_version = magic.version;
        self.streamed = magic.streamed;

        let mut block: Option<HeaderBlock> = None;
        let mut saw_trailing_block = false;
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| self.io_error("Failed to read", e))?;
            if n == 0 {
                break;
            }
            let text = trim_line_end(&line);

            if let Some(name) = text.strip_prefix(SECTION_PREFIX) {
                match name {
                    META_SECTION => block = Some(HeaderBlock::Meta),
                    INDEX_SECTION => block = Some(HeaderBlock::Index),
                    TRAILING_INDEX_SECTION => {
                        block = Some(HeaderBlock::Trailing);
                        saw_trailing_block = true;
                    }
                    // First content section: the header region is done.
                    _ => break,
                }
                continue;
            }
            if parser::is_eof_marker_line(text) {
                break;
            }

            match block {
                Some(HeaderBlock::Meta) => apply_meta_line(&mut self.meta, text)?,
                Some(HeaderBlock::Index) => {
                    apply_index_line(&mut self.index, &mut self.meta, self.file_size, text, false)
                }
                Some(HeaderBlock::Trailing) => {
                    apply_index_line(&mut self.index, &mut self.meta, self.file_size, text, true)
                }
                None => {}
            }
        }

        // A streamed file parsed to its first content section has no
        // inline index; its index lives at the tail.
        if self.streamed && self.index.is_empty() && !saw_trailing_block {
            self.locate_trailing_index()?;
        }
        Ok(())
    }

    /// Finds the trailing index of a streamed file. The `#!END:<offset>`
    /// hint is authoritative since a large index can exceed any fixed
    /// window; the window scan covers files whose EOF marker was lost.
    fn locate_trailing_index(&mut self) -> ReadResult<()> {
        let window = RECOVERY_TAIL_WINDOW.min(self.file_size);
        if window == 0 {
            return Ok(());
        }
        let start = self.file_size - window;
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|e| self.io_error("Failed to seek in", e))?;
        let mut tail = vec![0u8; window as usize];
        self.file
            .read_exact(&mut tail)
            .map_err(|e| self.io_error("Failed to read tail of", e))?;

        let (end_hint, trailing_rel) = scan_tail(&tail, start == 0);
        if let Some(index_offset) = end_hint {
            if index_offset < self.file_size && self.parse_index_at(index_offset)? {
                return Ok(());
            }
            warn!(
                "EOF offset hint {} in {} does not point at a trailing index",
                index_offset,
                self.path.display()
            );
        }
        if let Some(rel) = trailing_rel {
            if !self.parse_index_at(start + rel as u64)? {
                warn!(
                    "failed to parse trailing index at {} in {}",
                    start + rel as u64,
                    self.path.display()
                );
            }
        }
        Ok(())
    }

    /// Parses a trailing index block expected at `offset`. Returns false
    /// when no block header is found there.
    fn parse_index_at(&mut self, offset: u64) -> ReadResult<bool> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io_error("Failed to seek in", e))?;
        let mut reader = BufReader::new(&self.file);
        let expected_header = format!("{}{}", SECTION_PREFIX, TRAILING_INDEX_SECTION);

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return Ok(false),
            Ok(_) => {}
            // A forged offset can land inside arbitrary bytes.
            Err(e) if e.kind() == ErrorKind::InvalidData => return Ok(false),
            Err(e) => return Err(self.io_error("Failed to read", e)),
        }
        if trim_line_end(&line) != expected_header {
            return Ok(false);
        }

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::InvalidData => break,
                Err(e) => return Err(self.io_error("Failed to read", e)),
            }
            let text = trim_line_end(&line);
            if parser::is_eof_marker_line(text) || text.starts_with(SECTION_PREFIX) {
                break;
            }
            apply_index_line(&mut self.index, &mut self.meta, self.file_size, text, true);
        }
        Ok(true)
    }

    fn read_entry(&mut self, offset: u64, length: u64) -> ReadResult<String> {
        let raw = self.read_raw(offset, length)?;
        let chunk = String::from_utf8(raw).map_err(|e| ReadError::CorruptedSection {
            offset,
            reason: format!("invalid UTF-8: {}", e.utf8_error()),
        })?;
        Ok(decode_chunk(&chunk))
    }

    fn read_raw(&mut self, offset: u64, length: u64) -> ReadResult<Vec<u8>> {
        // Entries are bounds-checked on insert; check again before
        // trusting the arithmetic.
        if offset.checked_add(length).map_or(true, |end| end > self.file_size) {
            return Err(ReadError::CorruptedSection {
                offset,
                reason: "entry exceeds file size".to_string(),
            });
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| self.io_error("Failed to seek in", e))?;
        let mut buf = vec![0u8; length as usize];
        self.file
            .read_exact(&mut buf)
            .map_err(|e| ReadError::CorruptedSection {
                offset,
                reason: format!("short read: {}", e),
            })?;
        Ok(buf)
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> ReadError {
        ReadError::Io(format!("{} {}: {}", action, self.path.display(), e))
    }
}

enum HeaderBlock {
    Meta,
    Index,
    Trailing,
}

/// Decodes one on-disk section body: newline normalization, exactly one
/// terminator stripped, escaping reversed. Shared with crash recovery so
/// both sides hash identical bytes.
pub(crate) fn decode_chunk(chunk: &str) -> String {
    let normalized = normalize_newlines(chunk);
    let body = normalized.strip_suffix('\n').unwrap_or(&normalized);
    unescape_content(body)
}

/// One `key: value` line of the header metadata block, first wins.
fn apply_meta_line(meta: &mut BTreeMap<String, String>, line: &str) -> ReadResult<()> {
    if let Some((key, value)) = line.split_once(": ") {
        let key = key.trim();
        if key.is_empty() || meta.contains_key(key) {
            return Ok(());
        }
        if meta.len() >= META_ALLOWLIST.len() + MAX_META_FIELDS {
            return Err(ReadError::TooManyMetaFields(MAX_META_FIELDS));
        }
        meta.insert(key.to_string(), value.trim().to_string());
    }
    Ok(())
}

/// One line inside an index block. Three fields form an entry, which is
/// bounds-checked and silently dropped when invalid; in a trailing block
/// the two-field `checksum <hex>` line feeds metadata instead.
fn apply_index_line(
    index: &mut SectionIndex,
    meta: &mut BTreeMap<String, String>,
    file_size: u64,
    line: &str,
    trailing: bool,
) {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [name, offset, length] => {
            let parsed = match (offset.parse::<u64>(), length.parse::<u64>()) {
                (Ok(o), Ok(l)) => Some((o, l)),
                _ => None,
            };
            match parsed {
                Some((offset, length))
                    if offset.checked_add(length).map_or(false, |end| end <= file_size) =>
                {
                    index.add(name, offset, length);
                }
                _ => warn!("dropping invalid index entry: {:?}", line),
            }
        }
        ["checksum", digest] if trailing => {
            meta.entry("checksum".to_string())
                .or_insert_with(|| digest.to_string());
        }
        [] => {}
        _ => warn!("dropping malformed index line: {:?}", line),
    }
}

/// Scans a tail window for the last line-anchored `#!END:<offset>` hint
/// and the last line-anchored trailing-index header, reported as a byte
/// offset relative to the window. The scan stays on raw bytes: positions
/// are file offsets, and a window boundary inside a multi-byte character
/// must not shift them. When the window does not start at offset zero its
/// first line may be a fragment and is skipped.
fn scan_tail(tail: &[u8], anchored_from_start: bool) -> (Option<u64>, Option<usize>) {
    let mut end_hint = None;
    let mut trailing_rel = None;
    let trailing_header = format!("{}{}", SECTION_PREFIX, TRAILING_INDEX_SECTION);
    let mut pos = 0usize;
    for (i, line_bytes) in tail.split_inclusive(|&b| b == b'\n').enumerate() {
        let line = trim_line_end_bytes(line_bytes);
        if anchored_from_start || i > 0 {
            if let Some(rest) = line
                .strip_prefix(EOF_MARKER.as_bytes())
                .and_then(|r| r.strip_prefix(b":"))
            {
                if let Some(offset) = std::str::from_utf8(rest)
                    .ok()
                    .and_then(|r| r.trim().parse::<u64>().ok())
                {
                    end_hint = Some(offset);
                }
            } else if line == trailing_header.as_bytes() {
                trailing_rel = Some(pos);
            }
        }
        pos += line_bytes.len();
    }
    (end_hint, trailing_rel)
}

fn trim_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn trim_line_end_bytes(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse;
    use crate::writer::{serialize, write_document};
    use std::fs;
    use tempfile::TempDir;

    fn write_sample(dir: &TempDir, sections: &[(&str, &str)]) -> PathBuf {
        let mut doc = Document::create("handle-test", "m1");
        for (name, content) in sections {
            doc.add_section(name, content).unwrap();
        }
        let path = dir.path().join("doc.pfm");
        write_document(&doc, &path).unwrap();
        path
    }

    /// Builds a self-consistent streamed file by hand, with a trailing
    /// index, checksum line, and EOF offset hint.
    fn streamed_file(sections: &[(&str, &str)]) -> String {
        let mut text = String::from("#!PFM/1.0:STREAM\n#@meta\nagent: streamer\n");
        let mut entries = Vec::new();
        let mut hasher = Sha256::new();
        for (name, content) in sections {
            text.push_str(&format!("#@{}\n", name));
            let offset = text.len();
            text.push_str(&crate::format::escape_content(content));
            text.push('\n');
            entries.push((name.to_string(), offset, text.len() - offset));
            hasher.update(content.as_bytes());
        }
        let index_offset = text.len();
        text.push_str("#@index-trailing\n");
        for (name, offset, length) in &entries {
            text.push_str(&format!("{} {} {}\n", name, offset, length));
        }
        text.push_str(&format!("checksum {}\n", hex::encode(hasher.finalize())));
        text.push_str(&format!("#!END:{}\n", index_offset));
        text
    }

    #[test]
    fn test_open_batch_file() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("content", "hello"), ("chain", "a\nb")]);
        let mut handle = open(&path).unwrap();

        assert!(!handle.streamed());
        assert_eq!(handle.format_version, "1.0");
        assert_eq!(
            handle.meta.get("agent").map(String::as_str),
            Some("handle-test")
        );
        assert_eq!(handle.section_names(), vec!["chain", "content"]);
        assert_eq!(handle.get_section("content").unwrap().as_deref(), Some("hello"));
        assert_eq!(handle.get_section("chain").unwrap().as_deref(), Some("a\nb"));
        assert_eq!(handle.get_section("missing").unwrap(), None);
    }

    #[test]
    fn test_lazy_equals_full_parse() {
        let dir = TempDir::new().unwrap();
        let sections: &[(&str, &str)] = &[
            ("content", "#@fake\n#!END\nsafe"),
            ("note", "first"),
            ("note", "second\n"),
            ("empty", ""),
        ];
        let path = write_sample(&dir, sections);

        let full = parse(&fs::read(&path).unwrap()).unwrap();
        let mut handle = open(&path).unwrap();
        for section in &full.sections {
            let lazy_all = handle.get_sections(&section.name).unwrap();
            let full_all: Vec<&str> = full
                .get_sections(&section.name)
                .iter()
                .map(|s| s.content.as_str())
                .collect();
            assert_eq!(lazy_all, full_all, "section {:?}", section.name);
        }
    }

    #[test]
    fn test_duplicate_names_keep_file_order() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("note", "first"), ("other", "x"), ("note", "second")]);
        let mut handle = open(&path).unwrap();
        assert_eq!(handle.get_sections("note").unwrap(), vec!["first", "second"]);
        assert_eq!(
            handle.get_section("note").unwrap().as_deref(),
            Some("first")
        );
    }

    #[test]
    fn test_validate_checksum_batch() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("content", "hello"), ("chain", "x")]);
        let mut handle = open(&path).unwrap();
        assert!(handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_validate_checksum_detects_tamper() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("content", "hello")]);
        // Flip one content byte without changing any length.
        let mut data = fs::read(&path).unwrap();
        let pos = data.windows(5).position(|w| w == b"hello").unwrap();
        data[pos] = b'j';
        fs::write(&path, &data).unwrap();

        let mut handle = open(&path).unwrap();
        assert!(!handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_validate_checksum_absent_is_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.pfm");
        fs::write(&path, "#!PFM/1.0\n#@meta\n#@index\n#!END\n").unwrap();
        let mut handle = open(&path).unwrap();
        assert!(!handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_streamed_file_resolved_via_end_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        let text = streamed_file(&[("log", "entry one"), ("log", "entry two\nmore")]);
        fs::write(&path, &text).unwrap();

        let mut handle = open(&path).unwrap();
        assert!(handle.streamed());
        assert_eq!(
            handle.get_sections("log").unwrap(),
            vec!["entry one", "entry two\nmore"]
        );
        assert!(handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_streamed_file_without_end_marker_uses_window_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        let text = streamed_file(&[("log", "entry one")]);
        // Drop the final "#!END:<offset>" line; the window scan must
        // still find the trailing header.
        let cut = text.rfind("#!END:").unwrap();
        fs::write(&path, &text[..cut]).unwrap();

        let mut handle = open(&path).unwrap();
        assert_eq!(
            handle.get_section("log").unwrap().as_deref(),
            Some("entry one")
        );
    }

    #[test]
    fn test_streamed_file_with_forged_hint_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        let text = streamed_file(&[("log", "entry one")]);
        let index_offset = text.rfind("#@index-trailing").unwrap();
        // Point the hint at a wrong in-bounds offset.
        let forged = text.replace(&format!("#!END:{}", index_offset), "#!END:3");
        fs::write(&path, &forged).unwrap();

        let mut handle = open(&path).unwrap();
        assert_eq!(
            handle.get_section("log").unwrap().as_deref(),
            Some("entry one")
        );
    }

    #[test]
    fn test_window_scan_survives_multibyte_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        // Two-byte characters throughout the padding, sized so the tail
        // window opens partway into one of them.
        let pad = "é".repeat(33_000);
        let text = streamed_file(&[("pad", pad.as_str()), ("tail", "after")]);
        let cut = text.rfind("#!END:").unwrap();
        fs::write(&path, &text[..cut]).unwrap();

        assert!(cut as u64 > RECOVERY_TAIL_WINDOW, "file must outgrow the window");
        let boundary = cut - RECOVERY_TAIL_WINDOW as usize;
        assert!(
            !text.is_char_boundary(boundary),
            "window must start inside a character for this layout"
        );

        let mut handle = open(&path).unwrap();
        assert_eq!(handle.index.len(), 2, "window scan must find both entries");
        assert_eq!(
            handle.get_section("tail").unwrap().as_deref(),
            Some("after")
        );
        assert_eq!(
            handle.get_section("pad").unwrap().as_deref(),
            Some(pad.as_str())
        );
        assert!(handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_crashed_stream_has_empty_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        fs::write(&path, "#!PFM/1.0:STREAM\n#@meta\nagent: s\n#@log\npartial entr").unwrap();
        let mut handle = open(&path).unwrap();
        assert!(handle.streamed());
        assert!(handle.index.is_empty());
        assert_eq!(handle.get_section("log").unwrap(), None);
        assert!(!handle.validate_checksum().unwrap());
    }

    #[test]
    fn test_invalid_index_entries_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pfm");
        fs::write(
            &path,
            "#!PFM/1.0\n#@meta\n#@index\nghost 999999 10\nneg -5 3\nnoise one two three four\n#@a\nhi\n#!END\n",
        )
        .unwrap();
        let handle = open(&path).unwrap();
        assert!(handle.index.is_empty());
        assert!(handle.section_names().is_empty());
    }

    #[test]
    fn test_entry_for_section_named_checksum_is_indexed() {
        // Three-field lines are entries no matter the name; only the
        // two-field form is the checksum record.
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("checksum", "not a digest")]);
        let mut handle = open(&path).unwrap();
        assert_eq!(
            handle.get_section("checksum").unwrap().as_deref(),
            Some("not a digest")
        );
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            open(dir.path().join("nope.pfm")),
            Err(ReadError::Io(_))
        ));
    }

    #[test]
    fn test_to_document_bridges_to_full_parse() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, &[("content", "hello")]);
        let handle = open(&path).unwrap();
        let doc = handle.to_document().unwrap();
        assert_eq!(doc.content(), Some("hello"));
    }
}
