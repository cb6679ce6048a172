//! Error types for signing, encryption, and integrity checks.

use thiserror::Error;

use crate::reader::ReadError;
use crate::writer::WriteError;

/// Result type for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors raised by the security layer
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    // ==================
    // Signing
    // ==================
    /// Strict verification of a document that carries no signature
    #[error("Document has no signature")]
    MissingSignature,

    // ==================
    // Encryption
    // ==================
    /// Payload does not start with the encrypted-envelope header
    #[error("Not an encrypted PFM payload")]
    MissingEnvelopeHeader,

    /// Envelope header line is never terminated
    #[error("Malformed encrypted payload: missing header terminator")]
    MissingHeaderTerminator,

    /// Payload cannot hold salt, nonce, and authentication tag
    #[error("Encrypted payload too short: {size} bytes (minimum {min})")]
    PayloadTooShort { size: usize, min: usize },

    /// Wrong password or tampered ciphertext. AEAD tag failure does
    /// not distinguish the two cases.
    #[error("Decryption failed: wrong password or corrupted data")]
    AuthenticationFailed,

    /// AEAD encryption failure
    #[error("Encryption failed")]
    EncryptionFailed,

    // ==================
    // Wrapped Errors
    // ==================
    /// Serialization failure while preparing plaintext
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Parse failure on decrypted plaintext
    #[error("Read error: {0}")]
    Read(#[from] ReadError),
}
