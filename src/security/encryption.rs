//! Password-based encryption of whole containers.
//!
//! An encrypted file is a one-line envelope header followed by a binary
//! payload: `salt || nonce || ciphertext` (FORMAT.md §11). Keys are
//! derived with PBKDF2-HMAC-SHA256; the payload is sealed with
//! AES-256-GCM, with the envelope version bound in as associated data so
//! a payload cannot be replayed under a different envelope.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::document::Document;
use crate::reader;
use crate::writer::serialize;

use super::errors::{SecurityError, SecurityResult};

/// Header line opening an encrypted file.
pub const ENC_HEADER: &str = "#!PFM-ENC/1.0\n";
/// Version-independent prefix used for detection.
const ENC_PREFIX: &[u8] = b"#!PFM-ENC/";
/// Associated data binding ciphertexts to this envelope version.
const AES_AAD: &[u8] = b"PFM-ENC/1.0";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
/// Smallest well-formed payload: salt, nonce, and the tag of an empty
/// plaintext.
const MIN_PAYLOAD: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

// OWASP minimum for PBKDF2-HMAC-SHA256.
const PBKDF2_ITERATIONS: u32 = 600_000;

fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypts raw bytes into a `salt || nonce || ciphertext` payload.
/// Salt and nonce are fresh random values, so encrypting the same input
/// twice yields different payloads.
pub fn encrypt_bytes(plaintext: &[u8], password: &str) -> SecurityResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(&key.into());
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: AES_AAD,
            },
        )
        .map_err(|_| SecurityError::EncryptionFailed)?;

    let mut payload = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    Ok(payload)
}

/// Decrypts a `salt || nonce || ciphertext` payload. A wrong password and
/// a tampered payload both surface as [`SecurityError::AuthenticationFailed`].
pub fn decrypt_bytes(payload: &[u8], password: &str) -> SecurityResult<Vec<u8>> {
    if payload.len() < MIN_PAYLOAD {
        return Err(SecurityError::PayloadTooShort {
            size: payload.len(),
            min: MIN_PAYLOAD,
        });
    }
    let (salt, rest) = payload.split_at(SALT_LEN);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new(&key.into());
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: AES_AAD,
            },
        )
        .map_err(|_| SecurityError::AuthenticationFailed)
}

/// Serializes a document and wraps it in an encrypted envelope.
pub fn encrypt_document(doc: &Document, password: &str) -> SecurityResult<Vec<u8>> {
    let plaintext = serialize(doc)?;
    let payload = encrypt_bytes(&plaintext, password)?;
    let mut out = Vec::with_capacity(ENC_HEADER.len() + payload.len());
    out.extend_from_slice(ENC_HEADER.as_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Opens an encrypted envelope and parses the recovered plaintext as a
/// document.
pub fn decrypt_document(data: &[u8], password: &str) -> SecurityResult<Document> {
    if !data.starts_with(ENC_PREFIX) {
        return Err(SecurityError::MissingEnvelopeHeader);
    }
    let newline = data
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(SecurityError::MissingHeaderTerminator)?;
    let payload = &data[newline + 1..];
    if payload.len() < MIN_PAYLOAD {
        return Err(SecurityError::PayloadTooShort {
            size: payload.len(),
            min: MIN_PAYLOAD,
        });
    }
    let plaintext = decrypt_bytes(payload, password)?;
    Ok(reader::parse(&plaintext)?)
}

/// Cheap envelope detection without touching the payload.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.starts_with(ENC_PREFIX)
}
