//! Error types for document construction and mutation.

use thiserror::Error;

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised while building or mutating a document
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    // ==================
    // Section Validation
    // ==================
    /// Section name is empty
    #[error("Section name cannot be empty")]
    EmptySectionName,

    /// Section name exceeds the length cap
    #[error("Section name too long: {length} bytes (max {max})")]
    SectionNameTooLong { length: usize, max: usize },

    /// Section name contains characters outside the allowed charset
    #[error("Invalid section name {0:?}: only [a-z0-9_-] is allowed")]
    InvalidSectionName(String),

    /// Section name collides with a reserved block name
    #[error("Section name {0:?} is reserved")]
    ReservedSectionName(String),

    /// Document already holds the maximum number of sections
    #[error("Too many sections: limit is {0}")]
    TooManySections(usize),

    // ==================
    // Metadata Validation
    // ==================
    /// Custom metadata key is empty or malformed
    #[error("Invalid custom metadata key {0:?}")]
    InvalidMetaKey(String),

    /// Custom key would shadow a standard metadata field
    #[error("Custom metadata key {0:?} shadows a standard field")]
    MetaKeyShadowsField(String),

    /// Document already holds the maximum number of custom entries
    #[error("Too many custom metadata fields: limit is {0}")]
    TooManyMetaFields(usize),
}
