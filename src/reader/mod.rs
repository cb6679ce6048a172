//! Read paths: full parse and lazy indexed access.
//!
//! # Design Principles
//!
//! 1. **Two paths, one meaning**: for every intact file, lazily fetched
//!    section content is byte-identical to the fully parsed content.
//! 2. **Never trust the file**: sizes are capped before allocation, index
//!    entries are bounds-checked before seeking, and metadata duplicates
//!    cannot override earlier values.
//! 3. **Fail closed**: a missing checksum never validates; a trailing
//!    checksum is only honored by the lazy path, which knows its
//!    provenance.
//!
//! # Invariants Enforced
//!
//! - No read path allocates more than [`crate::format::MAX_FILE_SIZE`]
//!   bytes for a file.
//! - The full parse ignores index blocks entirely; offsets recorded on
//!   parsed sections come from the scan itself.
//! - Lazy access reads exactly the indexed byte range per request.

mod errors;
mod handle;
mod index;
mod parser;

pub use errors::{ReadError, ReadResult};
pub use handle::{open, PfmHandle};
pub use index::SectionIndex;
pub use parser::{parse, read};

pub(crate) use handle::decode_chunk;
pub(crate) use parser::parse_magic_line;
