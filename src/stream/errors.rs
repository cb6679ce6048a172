//! Error types for streaming writes and recovery.

use thiserror::Error;

use crate::document::DocumentError;
use crate::reader::ReadError;

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors raised by the streaming writer and crash recovery
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    // ==================
    // Writer Lifecycle
    // ==================
    /// Section write attempted after close
    #[error("Stream writer is closed")]
    WriterClosed,

    /// Append target is not a streamed file
    #[error("Not a streamed PFM file (missing :STREAM flag): {0}")]
    NotStreamFile(String),

    // ==================
    // Wrapped Errors
    // ==================
    /// Section name or count violated a document-model rule
    #[error("Invalid document: {0}")]
    Document(#[from] DocumentError),

    /// Read failure while recovering an existing file
    #[error("Recovery read failed: {0}")]
    Read(#[from] ReadError),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}
