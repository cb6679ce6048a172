//! Grammar layer: markers, limits, and escaping.
//!
//! This module is the single source of truth for the on-disk grammar
//! described in FORMAT.md. Everything above it (document model, writers,
//! readers) builds on these definitions.
//!
//! # Design Principles
//!
//! 1. **One grammar, one place**: marker strings and limits are never
//!    duplicated at use sites.
//! 2. **Escaping is reversible**: escape then unescape is the identity
//!    for every possible content string, at every nesting depth.
//! 3. **Bounded by construction**: every limit a reader enforces is a
//!    constant here, so hostile input cannot exhaust memory.
//!
//! # Invariants Enforced
//!
//! - Section names match `[a-z0-9_-]{1,64}` and never collide with
//!   reserved block names.
//! - A line is escaped iff it would otherwise be parsed as structure.

mod constants;
mod escape;

pub use constants::{
    is_pfm_bytes, is_pfm_file, is_reserved_name, is_valid_section_name, EOF_MARKER,
    FILE_EXTENSION, FORMAT_VERSION, INDEX_SECTION, MAGIC, MAX_FILE_SIZE, MAX_MAGIC_SCAN_BYTES,
    MAX_META_FIELDS, MAX_SECTIONS, MAX_SECTION_NAME_LENGTH, META_ALLOWLIST, META_SECTION,
    RECOVERY_TAIL_WINDOW, RESERVED_SECTION_NAMES, SECTION_PREFIX, STREAM_FLAG,
    SUPPORTED_VERSIONS, TRAILING_INDEX_SECTION,
};
pub use escape::{escape_content, escape_line, is_dangerous_line, unescape_content, unescape_line};
