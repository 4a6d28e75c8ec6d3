//! Ordering of removed paths.

use std::cmp::{Ordering, Reverse};

use serde::Serialize;

use dtar_core::{EntryType, path_depth};

/// A path present only in the old catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedEntry {
    pub path: String,
    pub entry_type: EntryType,
}

impl RemovedEntry {
    pub fn new(path: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            path: path.into(),
            entry_type,
        }
    }
}

/// Deeper paths first, ties broken lexicographically, so that a directory
/// always comes after everything it contains.
pub fn removal_cmp(a: &RemovedEntry, b: &RemovedEntry) -> Ordering {
    (Reverse(path_depth(&a.path)), &a.path).cmp(&(Reverse(path_depth(&b.path)), &b.path))
}

/// Sort removed entries into the order they can be deleted in.
pub fn removal_order(mut entries: Vec<RemovedEntry>) -> Vec<RemovedEntry> {
    entries.sort_by(removal_cmp);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(entries: &[RemovedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_children_before_parents() {
        let ordered = removal_order(vec![
            RemovedEntry::new("a", EntryType::Directory),
            RemovedEntry::new("a/b", EntryType::Directory),
            RemovedEntry::new("a/b/file", EntryType::RegularFile),
        ]);
        assert_eq!(paths(&ordered), vec!["a/b/file", "a/b", "a"]);
    }

    #[test]
    fn test_ties_are_lexicographic() {
        let ordered = removal_order(vec![
            RemovedEntry::new("z", EntryType::RegularFile),
            RemovedEntry::new("m/x", EntryType::RegularFile),
            RemovedEntry::new("b/y", EntryType::SymbolicLink),
            RemovedEntry::new("a", EntryType::Directory),
        ]);
        assert_eq!(paths(&ordered), vec!["b/y", "m/x", "a", "z"]);
    }
}
