//! HMAC-SHA256 signing over a canonical document encoding.
//!
//! The canonical message length-prefixes every field, so no arrangement
//! of metadata or section boundaries can collide with another document's
//! encoding (FORMAT.md §10). Signatures are stored in custom metadata
//! under [`SIGNATURE_KEY`] and travel inside the file like any other
//! metadata line.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::document::Document;
use crate::format::META_ALLOWLIST;

use super::errors::{SecurityError, SecurityResult};

type HmacSha256 = Hmac<Sha256>;

/// Custom-metadata key holding the signature.
pub const SIGNATURE_KEY: &str = "signature";
/// Custom-metadata key holding the algorithm tag.
pub const SIG_ALGO_KEY: &str = "sig_algo";
const SIG_ALGO: &str = "hmac-sha256";

/// Computes the hex signature for a document.
///
/// The canonical message folds in a freshly computed checksum, matching
/// what [`sign`] stores; a signature computed here and stored by hand is
/// only valid on a document whose `checksum` field is current.
pub fn signature(doc: &Document, secret: &[u8]) -> String {
    let message = canonical_message(doc, &doc.compute_checksum());
    hmac_hex(secret, &message)
}

/// Returns a signed copy of the document. The copy gets a refreshed
/// checksum plus `signature` and `sig_algo` custom-metadata entries; the
/// input document is not touched.
///
/// Because the checksum is refreshed before signing, a signed document
/// survives a write/read round trip verifiable: the writer emits the same
/// checksum the signature covers.
pub fn sign(doc: &Document, secret: &[u8]) -> Document {
    let mut signed = doc.clone();
    signed.checksum = signed.compute_checksum();
    let sig = signature(&signed, secret);
    // Inserted directly so the signature fields do not count against
    // MAX_META_FIELDS; a document at the cap can still be signed.
    signed
        .custom_meta
        .insert(SIGNATURE_KEY.to_string(), sig);
    signed
        .custom_meta
        .insert(SIG_ALGO_KEY.to_string(), SIG_ALGO.to_string());
    signed
}

/// Verifies the stored signature against the document as it stands,
/// including its *stored* checksum. Fail-closed: an unsigned document
/// verifies as false. Comparison is constant-time.
pub fn verify(doc: &Document, secret: &[u8]) -> bool {
    let stored = match doc.custom_meta.get(SIGNATURE_KEY) {
        Some(sig) if !sig.is_empty() => sig,
        _ => return false,
    };
    let message = canonical_message(doc, &doc.checksum);
    let expected = hmac_hex(secret, &message);
    expected.as_bytes().ct_eq(stored.as_bytes()).into()
}

/// Like [`verify`], but an unsigned document is an error instead of a
/// silent false, for callers that require signatures to be present.
pub fn verify_strict(doc: &Document, secret: &[u8]) -> SecurityResult<bool> {
    match doc.custom_meta.get(SIGNATURE_KEY) {
        Some(sig) if !sig.is_empty() => Ok(verify(doc, secret)),
        _ => Err(SecurityError::MissingSignature),
    }
}

/// Builds the length-prefixed canonical message: format version, then
/// every non-empty metadata pair as `key=value` in sorted key order
/// (signature entries excluded), then each section's name and content in
/// document order.
fn canonical_message(doc: &Document, checksum: &str) -> Vec<u8> {
    let mut message = Vec::new();
    append_field(&mut message, doc.format_version.as_bytes());

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for &key in META_ALLOWLIST {
        let value = if key == "checksum" {
            checksum
        } else {
            doc.meta_field(key).unwrap_or("")
        };
        if !value.is_empty() {
            pairs.push((key, value));
        }
    }
    for (key, value) in &doc.custom_meta {
        if key != SIGNATURE_KEY && key != SIG_ALGO_KEY {
            pairs.push((key.as_str(), value.as_str()));
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in pairs {
        append_field(&mut message, format!("{}={}", key, value).as_bytes());
    }

    for section in &doc.sections {
        append_field(&mut message, section.name.as_bytes());
        append_field(&mut message, section.content.as_bytes());
    }
    message
}

/// Appends one field as a 4-byte big-endian length followed by the raw
/// bytes.
fn append_field(message: &mut Vec<u8>, data: &[u8]) {
    message.extend_from_slice(&(data.len() as u32).to_be_bytes());
    message.extend_from_slice(data);
}

fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;
    use crate::writer::write_document;
    use tempfile::TempDir;

    const SECRET: &[u8] = b"test-secret-key";

    fn sample_doc() -> Document {
        let mut doc = Document::create("signer", "m1");
        doc.add_section("content", "Hello").unwrap();
        doc.add_section("chain", "User: hi\nAgent: hey").unwrap();
        doc.set_custom_meta("topic", "greetings").unwrap();
        doc
    }

    #[test]
    fn test_sign_then_verify() {
        let signed = sign(&sample_doc(), SECRET);
        assert!(verify(&signed, SECRET));
        assert_eq!(
            signed.custom_meta.get(SIG_ALGO_KEY).map(String::as_str),
            Some("hmac-sha256")
        );
        assert!(!signed.checksum.is_empty());
    }

    #[test]
    fn test_sign_does_not_mutate_input() {
        let doc = sample_doc();
        let _ = sign(&doc, SECRET);
        assert!(doc.checksum.is_empty());
        assert!(!doc.custom_meta.contains_key(SIGNATURE_KEY));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let signed = sign(&sample_doc(), SECRET);
        assert!(!verify(&signed, b"other-secret"));
    }

    #[test]
    fn test_unsigned_document_fails_closed() {
        assert!(!verify(&sample_doc(), SECRET));
        assert!(matches!(
            verify_strict(&sample_doc(), SECRET),
            Err(SecurityError::MissingSignature)
        ));
    }

    #[test]
    fn test_verify_strict_on_signed_document() {
        let signed = sign(&sample_doc(), SECRET);
        assert!(verify_strict(&signed, SECRET).unwrap());
        assert!(!verify_strict(&signed, b"wrong").unwrap());
    }

    #[test]
    fn test_tampered_content_fails() {
        let mut signed = sign(&sample_doc(), SECRET);
        signed.sections[0].content.push('!');
        assert!(!verify(&signed, SECRET));
    }

    #[test]
    fn test_tampered_metadata_fails() {
        let mut signed = sign(&sample_doc(), SECRET);
        signed.agent = "impostor".to_string();
        assert!(!verify(&signed, SECRET));

        let mut signed = sign(&sample_doc(), SECRET);
        signed.set_custom_meta("topic", "altered").unwrap();
        assert!(!verify(&signed, SECRET));
    }

    #[test]
    fn test_reordered_sections_fail() {
        let mut signed = sign(&sample_doc(), SECRET);
        signed.sections.swap(0, 1);
        assert!(!verify(&signed, SECRET));
    }

    #[test]
    fn test_section_boundaries_are_unambiguous() {
        // Same concatenated bytes, different boundaries: the length
        // prefixes must keep the messages distinct.
        let mut a = Document::new();
        a.add_section("s", "ab").unwrap();
        a.add_section("t", "c").unwrap();
        let mut b = Document::new();
        b.add_section("s", "a").unwrap();
        b.add_section("t", "bc").unwrap();
        assert_ne!(signature(&a, SECRET), signature(&b, SECRET));
    }

    #[test]
    fn test_signature_survives_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signed.pfm");
        let signed = sign(&sample_doc(), SECRET);
        write_document(&signed, &path).unwrap();

        let loaded = reader::read(&path).unwrap();
        assert!(verify(&loaded, SECRET));
        assert!(!verify(&loaded, b"wrong-secret"));
    }

    #[test]
    fn test_resigning_is_stable() {
        let once = sign(&sample_doc(), SECRET);
        let twice = sign(&once, SECRET);
        assert_eq!(
            once.custom_meta.get(SIGNATURE_KEY),
            twice.custom_meta.get(SIGNATURE_KEY)
        );
        assert!(verify(&twice, SECRET));
    }
}
