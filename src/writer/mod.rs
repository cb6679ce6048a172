//! Batch writer: whole-document serialization and atomic persistence.
//!
//! # Design Principles
//!
//! 1. **Serialization is pure**: `serialize` never mutates the document;
//!    checksum and index are computed into the output only.
//! 2. **Self-describing output**: every emitted file carries an inline
//!    index whose offsets are exact, resolved by fixed-point iteration.
//! 3. **Atomic persistence**: files are replaced via tmp-write, fsync,
//!    rename; partial writes are never observable.
//!
//! # Invariants Enforced
//!
//! - Every index entry points at the first content byte after its header
//!   line, and its length covers the escaped body plus one terminator.
//! - The emitted checksum always matches the document's content.
//! - Every section body ends with exactly one terminator newline.

mod errors;
mod persist;
mod serializer;

pub use errors::{WriteError, WriteResult};
pub use persist::write_document;
pub use serializer::serialize;

pub(crate) use serializer::meta_block;
