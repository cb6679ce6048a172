//! Whole-buffer parsing.
//!
//! The full parse decodes an entire buffer into a [`Document`]. Index
//! blocks are skipped wholesale: offsets matter only to the lazy path,
//! and a checksum recorded in a trailing index is deliberately not folded
//! into the document, so integrity checks fail closed rather than trust a
//! trailer (FORMAT.md §4).
//!
//! Line endings are normalized before any offset-sensitive work, so the
//! offsets recorded on parsed sections always refer to the normalized
//! text.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use crate::document::{Document, DocumentError, Section};
use crate::format::{
    unescape_content, EOF_MARKER, INDEX_SECTION, MAGIC, MAX_FILE_SIZE, MAX_META_FIELDS,
    MAX_SECTIONS, META_SECTION, SECTION_PREFIX, STREAM_FLAG, SUPPORTED_VERSIONS,
    TRAILING_INDEX_SECTION,
};

use super::errors::{ReadError, ReadResult};

/// Reads and fully parses the file at `path`.
///
/// The on-disk size is checked against [`MAX_FILE_SIZE`] before the
/// buffer is allocated.
pub fn read<P: AsRef<Path>>(path: P) -> ReadResult<Document> {
    let path = path.as_ref();
    let size = fs::metadata(path)
        .map_err(|e| ReadError::Io(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();
    if size > MAX_FILE_SIZE {
        return Err(ReadError::InputTooLarge {
            size,
            max: MAX_FILE_SIZE,
        });
    }
    let data = fs::read(path)
        .map_err(|e| ReadError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    parse(&data)
}

/// Parses a PFM buffer into a [`Document`].
///
/// Truncated files parse without error: a section cut off by the end of
/// input keeps its bytes exactly as found, without the terminator
/// stripping applied to intact sections.
pub fn parse(data: &[u8]) -> ReadResult<Document> {
    if data.len() as u64 > MAX_FILE_SIZE {
        return Err(ReadError::InputTooLarge {
            size: data.len() as u64,
            max: MAX_FILE_SIZE,
        });
    }
    let text =
        std::str::from_utf8(data).map_err(|e| ReadError::InvalidUtf8(e.valid_up_to()))?;
    let text = normalize_newlines(text);

    let mut lines = text.split('\n');
    let first = lines.next().unwrap_or("");
    let magic = parse_magic_line(first)?;

    let mut doc = Document::new();
    doc.format_version = magic.version;

    let mut pos = first.len() as u64 + 1;
    let mut current: Option<Block> = None;
    let mut saw_end = false;

    for line in lines {
        let line_len = line.len() as u64 + 1;

        if is_eof_marker_line(line) {
            flush(&mut doc, current.take(), pos)?;
            saw_end = true;
            break;
        }

        if let Some(name) = line.strip_prefix(SECTION_PREFIX) {
            flush(&mut doc, current.take(), pos)?;
            current = Some(match name {
                META_SECTION => Block::Meta,
                INDEX_SECTION | TRAILING_INDEX_SECTION => Block::Index,
                _ => Block::Section {
                    name,
                    start: pos + line_len,
                    lines: Vec::new(),
                },
            });
            pos += line_len;
            continue;
        }

        match current.as_mut() {
            Some(Block::Meta) => {
                if let Some((key, value)) = line.split_once(": ") {
                    apply_meta(&mut doc, key.trim(), value.trim())?;
                }
            }
            Some(Block::Index) => {}
            Some(Block::Section { lines, .. }) => lines.push(line),
            None => {}
        }
        pos += line_len;
    }

    if !saw_end {
        flush(&mut doc, current.take(), text.len() as u64)?;
    }
    Ok(doc)
}

enum Block<'a> {
    Meta,
    Index,
    Section {
        name: &'a str,
        start: u64,
        lines: Vec<&'a str>,
    },
}

/// Closes the current block. For a content section this joins the
/// accumulated lines and reverses the escaping; joining on `\n` drops the
/// terminator before an intact section's closing marker, while a section
/// truncated by end-of-input keeps its final bytes untouched.
fn flush(doc: &mut Document, block: Option<Block>, end: u64) -> ReadResult<()> {
    if let Some(Block::Section { name, start, lines }) = block {
        if doc.sections.len() >= MAX_SECTIONS {
            return Err(DocumentError::TooManySections(MAX_SECTIONS).into());
        }
        let content = unescape_content(&lines.join("\n"));
        let mut section = Section::new(name, &content);
        section.offset = start;
        section.length = end.saturating_sub(start);
        doc.sections.push(section);
    }
    Ok(())
}

/// Applies one metadata line with first-occurrence-wins semantics: a key
/// that already holds a value cannot be overridden by a later line, so a
/// forged trailer cannot rewrite the header.
fn apply_meta(doc: &mut Document, key: &str, value: &str) -> ReadResult<()> {
    if key.is_empty() {
        return Ok(());
    }
    match doc.meta_field(key).map(str::is_empty) {
        // Allowlisted and still unset.
        Some(true) => {
            doc.set_meta_field(key, value);
        }
        // Allowlisted and already set.
        Some(false) => {}
        // Custom metadata.
        None => {
            if !doc.custom_meta.contains_key(key) {
                if doc.custom_meta.len() >= MAX_META_FIELDS {
                    return Err(ReadError::TooManyMetaFields(MAX_META_FIELDS));
                }
                doc.custom_meta.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(())
}

/// Validated magic line contents (FORMAT.md §1).
pub(crate) struct MagicLine {
    pub version: String,
    pub streamed: bool,
}

/// Parses a magic line. The version must be in the supported set and the
/// only recognized flag is `:STREAM`; anything else is malformed.
pub(crate) fn parse_magic_line(line: &str) -> ReadResult<MagicLine> {
    let rest = match line.strip_prefix(MAGIC) {
        Some(rest) => rest,
        None => return Err(ReadError::MissingMagic),
    };
    let rest = match rest.strip_prefix('/') {
        Some(rest) => rest,
        None => return Err(ReadError::MalformedMagic(line.to_string())),
    };
    let (version, streamed) = match rest.split_once(':') {
        Some((version, flag)) if flag == STREAM_FLAG => (version, true),
        Some(_) => return Err(ReadError::MalformedMagic(line.to_string())),
        None => (rest, false),
    };
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ReadError::UnsupportedVersion(version.to_string()));
    }
    Ok(MagicLine {
        version: version.to_string(),
        streamed,
    })
}

/// True for `#!END` and `#!END:<offset>` lines.
pub(crate) fn is_eof_marker_line(line: &str) -> bool {
    line == EOF_MARKER
        || line
            .strip_prefix(EOF_MARKER)
            .map_or(false, |rest| rest.starts_with(':'))
}

/// Universal newline translation: CRLF and lone CR become LF. Borrows
/// when the input has no carriage returns.
pub(crate) fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}
