//! Error types for serialization and persistence.

use thiserror::Error;

/// Result type for writer operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Errors raised while serializing or persisting a document
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    // ==================
    // Serialization
    // ==================
    /// The self-referential index failed to stabilize. This indicates an
    /// internal logic error, not bad input.
    #[error("Index offsets failed to converge after {0} iterations")]
    IndexNotConverged(usize),

    // ==================
    // Persistence
    // ==================
    /// Destination path contains a parent-directory component
    #[error("Output path must not contain '..': {0}")]
    UnsafePath(String),

    /// Filesystem failure while persisting
    #[error("I/O error: {0}")]
    Io(String),
}
