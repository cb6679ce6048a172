//! Whole-document integrity checks on the in-memory model.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::document::Document;

/// Recomputes the content checksum and compares it to the stored one in
/// constant time. A document with no stored checksum fails closed.
pub fn verify_integrity(doc: &Document) -> bool {
    if doc.checksum.is_empty() {
        return false;
    }
    let computed = doc.compute_checksum();
    computed.as_bytes().ct_eq(doc.checksum.as_bytes()).into()
}

/// Derives a stable identity fingerprint from the document's id, stored
/// checksum, and creation time. Two documents share a fingerprint only
/// when all three match.
pub fn fingerprint(doc: &Document) -> String {
    let material = format!("{}:{}:{}", doc.id, doc.checksum, doc.created);
    hex::encode(Sha256::digest(material.as_bytes()))
}
