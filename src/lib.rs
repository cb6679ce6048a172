//! pfm - a self-indexing, append-friendly text container
//!
//! Plain UTF-8 files that carry their own metadata, section index, and
//! checksum, readable with `cat` and seekable without a full parse.

pub mod document;
pub mod format;
pub mod reader;
pub mod security;
pub mod stream;
pub mod writer;
