//! Security layer: integrity, authenticity, and confidentiality.
//!
//! Three independent mechanisms, each usable on its own:
//!
//! - checksums ([`verify_integrity`]) detect accidental corruption,
//! - HMAC signatures ([`sign`], [`verify`]) detect deliberate tampering
//!   by anyone without the secret,
//! - password encryption ([`encrypt_document`], [`decrypt_document`])
//!   hides the container entirely.
//!
//! # Design Principles
//!
//! 1. **Fail closed**: missing checksums and missing signatures verify as
//!    false, never as true.
//! 2. **Constant-time comparison**: every digest and signature check goes
//!    through `subtle`, not `==`.
//! 3. **Pure transforms**: signing returns a new document; the input is
//!    never mutated.
//!
//! # Invariants Enforced
//!
//! 1. A signed document that round-trips through a file still verifies.
//! 2. Any change to signed content, metadata, or section order breaks the
//!    signature.
//! 3. Wrong passwords and tampered ciphertexts are indistinguishable.

mod encryption;
mod errors;
mod integrity;
mod signing;

pub use encryption::{
    decrypt_bytes, decrypt_document, encrypt_bytes, encrypt_document, is_encrypted, ENC_HEADER,
};
pub use errors::{SecurityError, SecurityResult};
pub use integrity::{fingerprint, verify_integrity};
pub use signing::{sign, signature, verify, verify_strict, SIGNATURE_KEY, SIG_ALGO_KEY};
