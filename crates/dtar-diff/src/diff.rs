//! Classification of every path across two catalogs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use itertools::{EitherOrBoth, Itertools};
use serde::Serialize;
use tracing::{info, warn};

use dtar_core::{Catalog, CatalogError, EntryType, FingerprintRecord, Warning, WarningKind};

use crate::removal::{RemovedEntry, removal_order};

/// Whether `new` differs from `old` in any field that matters for the
/// archive.
///
/// The modification time and the resolved owner and group names are
/// ignored: a touch without a content or permission change, or a renamed
/// user, does not make a path changed.
pub fn state_changed(old: &FingerprintRecord, new: &FingerprintRecord) -> bool {
    old.mode != new.mode
        || old.owner_id != new.owner_id
        || old.group_id != new.group_id
        || old.size != new.size
        || old.entry_type != new.entry_type
        || old.link_target != new.link_target
        || old.content_hash != new.content_hash
}

/// Counts and volume of a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub changed: usize,
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Bytes the archive has to carry for changed and added entries, for a
    /// single volume. A chunked archive stores a hard link's bytes again
    /// when its leader went into an earlier volume.
    pub bytes_to_archive: u64,
}

impl DiffSummary {
    /// Entries that go into the archive.
    pub fn to_archive(&self) -> usize {
        self.changed + self.added
    }

    /// Whether the new catalog matches the old one.
    pub fn is_clean(&self) -> bool {
        self.changed == 0 && self.added == 0 && self.removed == 0
    }
}

/// Result of comparing an old and a new catalog of the same root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub root: PathBuf,
    /// Paths in both catalogs whose records differ, with the new record.
    pub changed: BTreeMap<String, FingerprintRecord>,
    /// Paths only in the new catalog.
    pub added: BTreeMap<String, FingerprintRecord>,
    /// Paths only in the old catalog, deepest first.
    pub removed: Vec<RemovedEntry>,
    /// Paths in both catalogs with equal records, in path order.
    pub unchanged: Vec<String>,
}

impl DiffResult {
    /// Changed and added entries merged in path order, so every directory
    /// precedes its contents.
    pub fn archive_entries(&self) -> impl Iterator<Item = (&str, &FingerprintRecord)> {
        self.changed
            .iter()
            .merge_by(self.added.iter(), |(a, _), (b, _)| a <= b)
            .map(|(path, record)| (path.as_str(), record))
    }

    /// Paths whose current bytes must be archived.
    pub fn archive_paths(&self) -> impl Iterator<Item = &str> {
        self.archive_entries().map(|(path, _)| path)
    }

    pub fn summary(&self) -> DiffSummary {
        let archived: BTreeSet<&str> = self.archive_paths().collect();
        let bytes_to_archive = self
            .archive_entries()
            .filter(|(_, record)| match record.entry_type {
                EntryType::RegularFile => true,
                // Stored as a link when its leader travels in the same archive
                EntryType::HardLink => !archived.contains(record.link_target.as_str()),
                EntryType::SymbolicLink | EntryType::Directory => false,
            })
            .filter_map(|(_, record)| record.size)
            .sum();

        DiffSummary {
            changed: self.changed.len(),
            added: self.added.len(),
            removed: self.removed.len(),
            unchanged: self.unchanged.len(),
            bytes_to_archive,
        }
    }

    /// Whether the four outputs together cover every key of `old` and `new`
    /// exactly once.
    pub fn is_partition_of(&self, old: &Catalog, new: &Catalog) -> bool {
        let expected: BTreeSet<&str> = old
            .files()
            .keys()
            .chain(new.files().keys())
            .map(String::as_str)
            .collect();

        let outputs = self
            .changed
            .keys()
            .chain(self.added.keys())
            .chain(self.removed.iter().map(|entry| &entry.path))
            .chain(self.unchanged.iter())
            .map(String::as_str);

        let mut seen = BTreeSet::new();
        for path in outputs {
            if !seen.insert(path) {
                return false;
            }
        }
        seen == expected
    }
}

/// Compares catalogs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEngine;

impl DiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Partition the paths of `old` and `new` into changed, added, removed
    /// and unchanged.
    ///
    /// Both key sets are walked once in sorted order. Catalogs of different
    /// roots cannot be compared.
    pub fn diff(&self, old: &Catalog, new: &Catalog) -> Result<DiffResult, CatalogError> {
        if !old.same_root(new) {
            return Err(CatalogError::IncomparableCatalogs {
                old: old.root().to_path_buf(),
                new: new.root().to_path_buf(),
            });
        }

        let mut result = DiffResult {
            root: new.root().to_path_buf(),
            ..DiffResult::default()
        };
        let mut removed = Vec::new();

        for pair in old
            .files()
            .iter()
            .merge_join_by(new.files().iter(), |(a, _), (b, _)| a.cmp(b))
        {
            match pair {
                EitherOrBoth::Left((path, record)) => {
                    removed.push(RemovedEntry::new(path.clone(), record.entry_type));
                }
                EitherOrBoth::Right((path, record)) => {
                    result.added.insert(path.clone(), record.clone());
                }
                EitherOrBoth::Both((path, before), (_, after)) => {
                    if state_changed(before, after) {
                        result.changed.insert(path.clone(), after.clone());
                    } else {
                        result.unchanged.push(path.clone());
                    }
                }
            }
        }
        result.removed = removal_order(removed);

        let summary = result.summary();
        info!(
            root = %result.root.display(),
            changed = summary.changed,
            added = summary.added,
            removed = summary.removed,
            unchanged = summary.unchanged,
            "Catalogs compared"
        );
        Ok(result)
    }

    /// Like [`diff`](Self::diff), but catalogs of a different root are
    /// replaced by the empty catalog of `new`'s root, with a warning.
    pub fn diff_or_bootstrap(&self, old: &Catalog, new: &Catalog) -> (DiffResult, Option<Warning>) {
        match self.diff(old, new) {
            Ok(result) => (result, None),
            Err(error) => {
                warn!("{error}; treating every path as added");
                let warning = Warning::new(new.root(), error.to_string(), WarningKind::IncomparableCatalogs);
                let bootstrap = Catalog::empty(new.root());
                // Same root by construction
                let result = self.diff(&bootstrap, new).unwrap_or_default();
                (result, Some(warning))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtar_core::{ContentHash, Ownership};

    fn owner() -> Ownership {
        Ownership::new(1000, "alice", 1000, "alice")
    }

    fn file(byte: u8) -> FingerprintRecord {
        FingerprintRecord::file(0o644, 100, &owner(), 5, ContentHash::new([byte; 32]))
    }

    fn catalog(root: &str, entries: &[(&str, FingerprintRecord)]) -> Catalog {
        Catalog::from_records(
            root,
            entries.iter().map(|(k, r)| (k.to_string(), r.clone())).collect(),
        )
    }

    #[test]
    fn test_state_changed_ignores_mtime_and_names() {
        let a = file(1);
        let mut b = a.clone();
        b.mtime = 999;
        b.owner_name = "renamed".into();
        b.group_name = "renamed".into();
        assert!(!state_changed(&a, &b));
    }

    #[test]
    fn test_state_changed_fields() {
        let a = file(1);

        let mut b = a.clone();
        b.mode = 0o600;
        assert!(state_changed(&a, &b));

        let mut b = a.clone();
        b.owner_id = 0;
        assert!(state_changed(&a, &b));

        let mut b = a.clone();
        b.group_id = 0;
        assert!(state_changed(&a, &b));

        assert!(state_changed(&a, &file(2)));

        let mut b = a.clone();
        b.size = Some(6);
        assert!(state_changed(&a, &b));
    }

    #[test]
    fn test_type_change_is_changed() {
        let old = catalog("/r", &[("x", file(1))]);
        let new = catalog("/r", &[("x", FingerprintRecord::symlink(0o777, 100, &owner(), "y"))]);
        let result = DiffEngine::new().diff(&old, &new).unwrap();
        assert!(result.changed.contains_key("x"));
    }

    #[test]
    fn test_incomparable_roots() {
        let old = catalog("/a", &[("x", file(1))]);
        let new = catalog("/b", &[("x", file(1))]);
        let err = DiffEngine::new().diff(&old, &new).unwrap_err();
        assert!(matches!(err, CatalogError::IncomparableCatalogs { .. }));

        let (result, warning) = DiffEngine::new().diff_or_bootstrap(&old, &new);
        assert_eq!(warning.unwrap().kind, WarningKind::IncomparableCatalogs);
        assert_eq!(result.added.len(), 1);
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_archive_entries_are_path_ordered() {
        let old = catalog("/r", &[("b", file(1))]);
        let new = catalog(
            "/r",
            &[
                ("a", FingerprintRecord::directory(0o755, 0, &owner())),
                ("a/x", file(3)),
                ("b", file(2)),
                ("c", file(4)),
            ],
        );
        let result = DiffEngine::new().diff(&old, &new).unwrap();
        let paths: Vec<_> = result.archive_paths().collect();
        assert_eq!(paths, vec!["a", "a/x", "b", "c"]);
    }

    #[test]
    fn test_summary_counts_hard_link_bytes_once() {
        let hash = ContentHash::new([9; 32]);
        let new = catalog(
            "/r",
            &[
                ("a", FingerprintRecord::file(0o644, 0, &owner(), 10, hash)),
                ("b", FingerprintRecord::hard_link(0o644, 0, &owner(), 10, hash, "a")),
                ("d", FingerprintRecord::directory(0o755, 0, &owner())),
            ],
        );
        let result = DiffEngine::new().diff(&Catalog::empty("/r"), &new).unwrap();
        let summary = result.summary();
        assert_eq!(summary.added, 3);
        assert_eq!(summary.bytes_to_archive, 10);
        assert_eq!(summary.to_archive(), 3);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_counts_hard_link_bytes_without_leader() {
        let hash = ContentHash::new([9; 32]);
        let leader = FingerprintRecord::file(0o644, 0, &owner(), 10, hash);
        let link = FingerprintRecord::hard_link(0o644, 0, &owner(), 10, hash, "a");
        let old = catalog("/r", &[("a", leader.clone())]);
        let new = catalog("/r", &[("a", leader), ("b", link)]);

        let summary = DiffEngine::new().diff(&old, &new).unwrap().summary();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.bytes_to_archive, 10);
    }
}
