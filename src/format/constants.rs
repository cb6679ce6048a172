//! Grammar constants and safety limits.
//!
//! Every marker, reserved name, and resource cap in FORMAT.md is defined
//! here so writers and readers cannot drift apart.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Magic prefix identifying a PFM file (FORMAT.md §1).
pub const MAGIC: &str = "#!PFM";

/// Format version emitted by writers.
pub const FORMAT_VERSION: &str = "1.0";

/// Versions readers accept. Anything else is a hard parse failure.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Flag appended to the magic line by the streaming writer.
pub const STREAM_FLAG: &str = "STREAM";

/// Prefix introducing every block header line.
pub const SECTION_PREFIX: &str = "#@";

/// End-of-file marker (FORMAT.md §6).
pub const EOF_MARKER: &str = "#!END";

/// Reserved name of the metadata block.
pub const META_SECTION: &str = "meta";

/// Reserved name of the inline index block.
pub const INDEX_SECTION: &str = "index";

/// Reserved name of the trailing index block in streamed files.
pub const TRAILING_INDEX_SECTION: &str = "index-trailing";

/// Block names content sections may not claim.
pub const RESERVED_SECTION_NAMES: &[&str] =
    &[META_SECTION, INDEX_SECTION, TRAILING_INDEX_SECTION];

/// Metadata keys stored as direct document fields, in canonical emission
/// order. Everything else is custom metadata.
pub const META_ALLOWLIST: &[&str] = &[
    "id", "agent", "model", "created", "checksum", "parent", "tags", "version",
];

/// Maximum file or buffer size accepted by any read path.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum sections per document.
pub const MAX_SECTIONS: usize = 10_000;

/// Maximum custom metadata entries per document.
pub const MAX_META_FIELDS: usize = 100;

/// Maximum length of a section name in bytes.
pub const MAX_SECTION_NAME_LENGTH: usize = 64;

/// Bytes read by the magic sniff helpers.
pub const MAX_MAGIC_SCAN_BYTES: usize = 64;

/// Tail window scanned when locating a trailing index without an offset
/// hint (FORMAT.md §7).
pub const RECOVERY_TAIL_WINDOW: u64 = 64 * 1024;

/// Canonical file extension.
pub const FILE_EXTENSION: &str = "pfm";

/// Returns true when `name` is a legal section name: 1 to 64 bytes drawn
/// from `[a-z0-9_-]`. Reserved names pass this check; use
/// [`is_reserved_name`] to exclude them.
pub fn is_valid_section_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SECTION_NAME_LENGTH
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
}

/// Returns true when `name` collides with a reserved block name.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_SECTION_NAMES.contains(&name)
}

/// Cheap sniff: does this buffer start with the PFM magic?
pub fn is_pfm_bytes(data: &[u8]) -> bool {
    data.starts_with(MAGIC.as_bytes())
}

/// Cheap sniff for a file on disk. Reads at most [`MAX_MAGIC_SCAN_BYTES`];
/// any I/O failure reads as "not PFM".
pub fn is_pfm_file<P: AsRef<Path>>(path: P) -> bool {
    let file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let mut head = Vec::with_capacity(MAX_MAGIC_SCAN_BYTES);
    if file
        .take(MAX_MAGIC_SCAN_BYTES as u64)
        .read_to_end(&mut head)
        .is_err()
    {
        return false;
    }
    is_pfm_bytes(&head)
}
