//! Document model: metadata plus ordered named sections.
//!
//! # Design Principles
//!
//! 1. **Validation at the boundary**: section names and custom metadata
//!    keys are checked on insertion, so a built document always
//!    serializes to a parseable file.
//! 2. **Order is meaning**: sections keep insertion order; the checksum
//!    and signature both cover that order.
//! 3. **Empty means unset**: standard metadata fields hold the empty
//!    string when absent and are skipped on emission.
//!
//! # Invariants Enforced
//!
//! - Section names match the grammar and never collide with reserved
//!   block names.
//! - Section and custom-metadata counts stay within the format limits.
//! - `compute_checksum` depends only on section contents and order.

mod errors;
mod model;

pub use errors::{DocumentError, DocumentResult};
pub use model::{Document, Section};

pub(crate) use model::validate_section_name;
