//! In-memory document model.
//!
//! A [`Document`] holds metadata fields and an ordered list of named
//! [`Section`]s. Metadata uses the empty string as "unset"; only
//! non-empty fields are serialized (FORMAT.md §3). The checksum protocol
//! (FORMAT.md §9) hashes section contents in order with no separators, so
//! section order is semantically significant.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::format::{
    is_reserved_name, is_valid_section_name, FORMAT_VERSION, MAX_META_FIELDS, MAX_SECTIONS,
    MAX_SECTION_NAME_LENGTH, META_ALLOWLIST,
};
use crate::writer::{self, WriteError, WriteResult};

use super::errors::{DocumentError, DocumentResult};

/// One named unit of document content.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    /// Original, unescaped content. Escaping is applied only at
    /// serialization time.
    pub content: String,
    /// Byte offset of the on-disk content. Populated when a file is
    /// parsed; zero for a freshly built section.
    pub offset: u64,
    /// On-disk byte length including the terminator newline. Populated on
    /// parse; zero for a freshly built section.
    pub length: u64,
}

impl Section {
    pub fn new(name: &str, content: &str) -> Self {
        Section {
            name: name.to_string(),
            content: content.to_string(),
            offset: 0,
            length: 0,
        }
    }
}

/// In-memory representation of a PFM file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub agent: String,
    pub model: String,
    pub created: String,
    /// Stored content checksum. Writers always emit a freshly computed
    /// value; this field holds whatever a parsed file declared.
    pub checksum: String,
    pub parent: String,
    pub tags: String,
    pub version: String,
    /// Metadata beyond the standard fields. Sorted iteration keeps
    /// serialization and signing deterministic.
    pub custom_meta: BTreeMap<String, String>,
    /// Ordered sections. Order is covered by the checksum and signature.
    pub sections: Vec<Section>,
    pub format_version: String,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document with the current format version.
    pub fn new() -> Self {
        Document {
            id: String::new(),
            agent: String::new(),
            model: String::new(),
            created: String::new(),
            checksum: String::new(),
            parent: String::new(),
            tags: String::new(),
            version: String::new(),
            custom_meta: BTreeMap::new(),
            sections: Vec::new(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }

    /// Creates a document with a generated id and creation timestamp.
    pub fn create(agent: &str, model: &str) -> Self {
        let mut doc = Self::new();
        doc.id = Uuid::new_v4().to_string();
        doc.agent = agent.to_string();
        doc.model = model.to_string();
        doc.created = Utc::now().to_rfc3339();
        doc
    }

    /// Appends a named section after validating the name and the
    /// section-count cap.
    pub fn add_section(&mut self, name: &str, content: &str) -> DocumentResult<()> {
        validate_section_name(name)?;
        if self.sections.len() >= MAX_SECTIONS {
            return Err(DocumentError::TooManySections(MAX_SECTIONS));
        }
        self.sections.push(Section::new(name, content));
        Ok(())
    }

    /// First section with the given name, if any. Duplicate names are
    /// legal; see [`Document::get_sections`] for all instances.
    pub fn get_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Every section with the given name, in document order.
    pub fn get_sections(&self, name: &str) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.name == name).collect()
    }

    /// Shortcut to the conventional primary content section.
    pub fn content(&self) -> Option<&str> {
        self.get_section("content").map(|s| s.content.as_str())
    }

    /// Shortcut to the conversation chain section.
    pub fn chain(&self) -> Option<&str> {
        self.get_section("chain").map(|s| s.content.as_str())
    }

    /// SHA-256 over every section's content in document order, no
    /// separators, as lowercase hex (FORMAT.md §9).
    pub fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for section in &self.sections {
            hasher.update(section.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Reads a standard metadata field by name. `None` for keys outside
    /// the allowlist; the empty string means "unset".
    pub fn meta_field(&self, key: &str) -> Option<&str> {
        let value = match key {
            "id" => &self.id,
            "agent" => &self.agent,
            "model" => &self.model,
            "created" => &self.created,
            "checksum" => &self.checksum,
            "parent" => &self.parent,
            "tags" => &self.tags,
            "version" => &self.version,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Writes a standard metadata field by name. Returns false for keys
    /// outside the allowlist.
    pub(crate) fn set_meta_field(&mut self, key: &str, value: &str) -> bool {
        let slot = match key {
            "id" => &mut self.id,
            "agent" => &mut self.agent,
            "model" => &mut self.model,
            "created" => &mut self.created,
            "checksum" => &mut self.checksum,
            "parent" => &mut self.parent,
            "tags" => &mut self.tags,
            "version" => &mut self.version,
            _ => return false,
        };
        *slot = value.to_string();
        true
    }

    /// All non-empty metadata as ordered pairs: standard fields in
    /// canonical order, then custom entries in sorted key order. This is
    /// the emission order of the metadata block.
    pub fn meta_map(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for &key in META_ALLOWLIST {
            if let Some(value) = self.meta_field(key) {
                if !value.is_empty() {
                    pairs.push((key.to_string(), value.to_string()));
                }
            }
        }
        for (key, value) in &self.custom_meta {
            pairs.push((key.clone(), value.clone()));
        }
        pairs
    }

    /// Inserts a custom metadata entry after validating the key.
    ///
    /// Keys must be non-empty, at most 64 bytes, free of `:` and a
    /// leading `#`, and must not shadow a standard field. Overwriting an
    /// existing key is allowed and does not count against the cap.
    pub fn set_custom_meta(&mut self, key: &str, value: &str) -> DocumentResult<()> {
        if key.is_empty()
            || key.len() > MAX_SECTION_NAME_LENGTH
            || key.contains(':')
            || key.starts_with('#')
        {
            return Err(DocumentError::InvalidMetaKey(key.to_string()));
        }
        if META_ALLOWLIST.contains(&key) {
            return Err(DocumentError::MetaKeyShadowsField(key.to_string()));
        }
        if !self.custom_meta.contains_key(key) && self.custom_meta.len() >= MAX_META_FIELDS {
            return Err(DocumentError::TooManyMetaFields(MAX_META_FIELDS));
        }
        self.custom_meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Serializes this document to PFM bytes.
    pub fn to_bytes(&self) -> WriteResult<Vec<u8>> {
        writer::serialize(self)
    }

    /// Writes this document to `path` via the atomic persist path.
    ///
    /// Refuses paths containing a `..` component.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> WriteResult<()> {
        let path = path.as_ref();
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(WriteError::UnsafePath(path.display().to_string()));
        }
        writer::write_document(self, path)
    }
}

/// Checks a section name against the grammar rules. Shared by the
/// document model and the streaming writer.
pub(crate) fn validate_section_name(name: &str) -> DocumentResult<()> {
    if name.is_empty() {
        return Err(DocumentError::EmptySectionName);
    }
    if name.len() > MAX_SECTION_NAME_LENGTH {
        return Err(DocumentError::SectionNameTooLong {
            length: name.len(),
            max: MAX_SECTION_NAME_LENGTH,
        });
    }
    if !is_valid_section_name(name) {
        return Err(DocumentError::InvalidSectionName(name.to_string()));
    }
    if is_reserved_name(name) {
        return Err(DocumentError::ReservedSectionName(name.to_string()));
    }
    Ok(())
}
