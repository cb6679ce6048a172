//! Section index for seek-based access.

use std::collections::BTreeMap;

/// Maps section names to the `(offset, length)` entries recorded for
/// them. Duplicate names keep their file order per name; the map itself
/// iterates in sorted name order for deterministic listings.
#[derive(Debug, Clone, Default)]
pub struct SectionIndex {
    entries: BTreeMap<String, Vec<(u64, u64)>>,
}

impl SectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one entry. Callers are responsible for bounds-checking the
    /// offset and length against the file size first.
    pub(crate) fn add(&mut self, name: &str, offset: u64, length: u64) {
        self.entries
            .entry(name.to_string())
            .or_default()
            .push((offset, length));
    }

    /// First `(offset, length)` recorded for `name`.
    pub fn get(&self, name: &str) -> Option<(u64, u64)> {
        self.entries.get(name).and_then(|v| v.first().copied())
    }

    /// Every `(offset, length)` recorded for `name`, in file order.
    pub fn get_all(&self, name: &str) -> &[(u64, u64)] {
        self.entries.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Indexed section names, sorted.
    pub fn section_names(&self) -> Vec<&str> {
        self.entries.keys().map(|k| k.as_str()).collect()
    }

    /// Total entry count across all names.
    pub fn len(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries sorted by file offset. Checksum validation walks the
    /// file in on-disk order no matter how the index block ordered its
    /// lines.
    pub(crate) fn entries_by_offset(&self) -> Vec<(u64, u64)> {
        let mut all: Vec<(u64, u64)> = self.entries.values().flatten().copied().collect();
        all.sort_unstable_by_key(|&(offset, _)| offset);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_all() {
        let mut index = SectionIndex::new();
        index.add("note", 10, 5);
        index.add("note", 40, 7);
        index.add("content", 20, 3);

        assert_eq!(index.get("note"), Some((10, 5)));
        assert_eq!(index.get_all("note"), &[(10, 5), (40, 7)]);
        assert_eq!(index.get("missing"), None);
        assert!(index.get_all("missing").is_empty());
        assert!(index.contains("content"));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_names_sorted() {
        let mut index = SectionIndex::new();
        index.add("zeta", 1, 1);
        index.add("alpha", 2, 1);
        assert_eq!(index.section_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_entries_by_offset() {
        let mut index = SectionIndex::new();
        index.add("b", 50, 4);
        index.add("a", 10, 4);
        index.add("b", 30, 4);
        assert_eq!(index.entries_by_offset(), vec![(10, 4), (30, 4), (50, 4)]);
    }
}
