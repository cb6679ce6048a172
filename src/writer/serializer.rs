//! Two-pass serialization with a self-referential inline index.
//!
//! Index entries record absolute byte offsets, and the index block sits
//! *before* the content it describes, so entry offsets depend on the
//! index's own length. Pass 1 renders every section body; pass 2 resolves
//! the index by fixed-point iteration on its rendered length (FORMAT.md
//! §4.1). Offsets only shift when an entry crosses a decimal-digit
//! boundary, which can only grow the block, so the iteration converges in
//! two or three rounds.

use log::debug;

use crate::document::Document;
use crate::format::{
    escape_content, EOF_MARKER, INDEX_SECTION, MAGIC, META_ALLOWLIST, META_SECTION,
    SECTION_PREFIX,
};

use super::errors::{WriteError, WriteResult};

/// Upper bound on fixed-point rounds. Two boundary crossings is already
/// pathological; five means something is broken.
const MAX_INDEX_ROUNDS: usize = 5;

/// A section rendered for emission: header line plus newline-terminated
/// escaped body.
struct SectionBlob {
    name: String,
    header: String,
    body: String,
}

/// Serializes a document to PFM bytes.
///
/// Pure: the input document is not modified. The emitted metadata block
/// carries a freshly computed checksum regardless of what the `checksum`
/// field holds, so serialized bytes always pass integrity validation.
pub fn serialize(doc: &Document) -> WriteResult<Vec<u8>> {
    let checksum = doc.compute_checksum();

    let mut blobs = Vec::with_capacity(doc.sections.len());
    for section in &doc.sections {
        let header = format!("{}{}\n", SECTION_PREFIX, section.name);
        let mut body = escape_content(&section.content);
        body.push('\n');
        blobs.push(SectionBlob {
            name: section.name.clone(),
            header,
            body,
        });
    }

    let mut out = format!("{}/{}\n", MAGIC, doc.format_version);
    out.push_str(&meta_block(doc, Some(&checksum)));
    let header_len = out.len() as u64;
    out.push_str(&index_block(header_len, &blobs)?);
    for blob in &blobs {
        out.push_str(&blob.header);
        out.push_str(&blob.body);
    }
    out.push_str(EOF_MARKER);
    out.push('\n');
    Ok(out.into_bytes())
}

/// Renders the metadata block: standard fields in canonical order, then
/// custom entries in sorted key order, empty values skipped (FORMAT.md
/// §3).
///
/// `checksum` overrides the document's stored value: the batch writer
/// passes a fresh digest, the streaming writer passes `None` because its
/// checksum lives in the trailing index and an inline value would win the
/// first-occurrence rule.
pub(crate) fn meta_block(doc: &Document, checksum: Option<&str>) -> String {
    let mut out = format!("{}{}\n", SECTION_PREFIX, META_SECTION);
    for &key in META_ALLOWLIST {
        if key == "checksum" {
            if let Some(fresh) = checksum {
                out.push_str(&format!("checksum: {}\n", sanitize_meta(fresh)));
            }
            continue;
        }
        if let Some(value) = doc.meta_field(key) {
            if !value.is_empty() {
                out.push_str(&format!("{}: {}\n", key, sanitize_meta(value)));
            }
        }
    }
    for (key, value) in &doc.custom_meta {
        out.push_str(&format!(
            "{}: {}\n",
            sanitize_meta(key),
            sanitize_meta(value)
        ));
    }
    out
}

/// Strips control characters so a metadata value can never smuggle a
/// header or marker line into the file.
fn sanitize_meta(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// Resolves the inline index block by fixed-point iteration.
///
/// `header_len` is the byte length of everything before the index block
/// (magic line plus metadata). Each entry offset points at the first
/// content byte after the section's header line.
fn index_block(header_len: u64, blobs: &[SectionBlob]) -> WriteResult<String> {
    let block_header = format!("{}{}\n", SECTION_PREFIX, INDEX_SECTION);
    let mut index = block_header.clone();

    for round in 0..MAX_INDEX_ROUNDS {
        let mut candidate = block_header.clone();
        let mut cursor = header_len + index.len() as u64;
        for blob in blobs {
            let content_offset = cursor + blob.header.len() as u64;
            candidate.push_str(&format!(
                "{} {} {}\n",
                blob.name,
                content_offset,
                blob.body.len()
            ));
            cursor += (blob.header.len() + blob.body.len()) as u64;
        }
        let stable = candidate.len() == index.len();
        index = candidate;
        if stable {
            debug!("index converged after {} rounds", round + 1);
            return Ok(index);
        }
    }
    Err(WriteError::IndexNotConverged(MAX_INDEX_ROUNDS))
}
