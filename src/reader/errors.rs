//! Error types for the read paths.

use thiserror::Error;

use crate::document::DocumentError;

/// Result type for reader operations
pub type ReadResult<T> = Result<T, ReadError>;

/// Errors raised while parsing or lazily reading a file
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    // ==================
    // Format Errors
    // ==================
    /// First line does not start with the magic prefix
    #[error("Not a PFM file: first line must start with '#!PFM'")]
    MissingMagic,

    /// Magic line is present but does not follow the grammar
    #[error("Malformed magic line: {0:?}")]
    MalformedMagic(String),

    /// Declared format version is outside the supported set
    #[error("Unsupported format version: {0:?}")]
    UnsupportedVersion(String),

    /// Input is not valid UTF-8
    #[error("Invalid UTF-8 at byte offset {0}")]
    InvalidUtf8(usize),

    // ==================
    // Resource Limits
    // ==================
    /// Input exceeds the maximum accepted size
    #[error("Input of {size} bytes exceeds the {max} byte limit")]
    InputTooLarge { size: u64, max: u64 },

    /// Metadata block holds more entries than allowed
    #[error("Too many metadata fields: limit is {0}")]
    TooManyMetaFields(usize),

    // ==================
    // Content Errors
    // ==================
    /// Parsed content violated a document-model rule
    #[error("Invalid document: {0}")]
    Document(#[from] DocumentError),

    /// An indexed section body could not be decoded
    #[error("Corrupted section at offset {offset}: {reason}")]
    CorruptedSection { offset: u64, reason: String },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}
