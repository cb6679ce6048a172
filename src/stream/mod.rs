//! Streaming writes with crash recovery.
//!
//! # Design Principles
//!
//! 1. **Durability per section**: every `write_section` ends in an
//!    fsync; a crash can lose at most the section being written.
//! 2. **Deferred index**: offsets are tracked in memory and written once
//!    at close, so section bytes are never rewritten.
//! 3. **Recovery before append**: reopening always rebuilds state from
//!    the bytes actually on disk, never from a possibly stale index, and
//!    a backup copy is taken before the file is modified.
//!
//! # Invariants Enforced
//!
//! - A streamed file is parseable at every instant between section
//!   writes, with or without its trailing index.
//! - The trailing checksum always equals the digest of the recovered
//!   section contents in file order.
//! - Escaped marker lines inside content never trigger truncation during
//!   recovery.

mod errors;
mod recovery;
mod writer;

pub use errors::{StreamError, StreamResult};
pub use writer::StreamWriter;
