//! Catalog: a snapshot of one directory tree at one point in time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::record::{EntryType, FingerprintRecord};

/// Distinct (numeric id, name) pairs, ordered by id then name.
pub type IdTable = BTreeSet<(u32, CompactString)>;

/// Check that `key` is a usable catalog key: relative, `/` separated,
/// without empty, `.` or `..` components.
pub fn is_catalog_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .split('/')
            .all(|component| !component.is_empty() && component != "." && component != "..")
}

/// Number of components in a catalog key (`a` is 1, `a/b` is 2).
pub fn path_depth(key: &str) -> usize {
    key.split('/').count()
}

/// Summary statistics for a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    /// Total bytes of regular files (hard links not counted twice).
    pub total_size: u64,
    pub files: u64,
    pub hard_links: u64,
    pub symlinks: u64,
    pub dirs: u64,
    /// Deepest key in the catalog.
    pub max_depth: usize,
}

/// A complete snapshot of a directory tree: relative path to fingerprint.
///
/// The owner and group tables are always derived from `files`, so a
/// catalog cannot be built with tables that disagree with its records.
/// Catalogs are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Absolute path of the snapshotted directory.
    #[serde(rename = "start_point")]
    root: PathBuf,

    #[serde(rename = "uids")]
    owners: IdTable,

    #[serde(rename = "gids")]
    groups: IdTable,

    files: BTreeMap<String, FingerprintRecord>,
}

impl Catalog {
    /// The canonical empty catalog for `root`, used when no prior snapshot
    /// exists (bootstrap).
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            owners: IdTable::new(),
            groups: IdTable::new(),
            files: BTreeMap::new(),
        }
    }

    /// Build a catalog from completed records, deriving the id tables.
    pub fn from_records(root: impl Into<PathBuf>, files: BTreeMap<String, FingerprintRecord>) -> Self {
        let (owners, groups) = derive_tables(&files);
        Self {
            root: root.into(),
            owners,
            groups,
            files,
        }
    }

    /// Root path that was scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Distinct (uid, user name) pairs used by the records.
    pub fn owners(&self) -> &IdTable {
        &self.owners
    }

    /// Distinct (gid, group name) pairs used by the records.
    pub fn groups(&self) -> &IdTable {
        &self.groups
    }

    /// All records, keyed by relative path.
    pub fn files(&self) -> &BTreeMap<String, FingerprintRecord> {
        &self.files
    }

    /// Look up a record by relative path.
    pub fn get(&self, path: &str) -> Option<&FingerprintRecord> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// An empty catalog describes an empty tree.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether both catalogs describe the same root.
    pub fn same_root(&self, other: &Catalog) -> bool {
        self.root == other.root
    }

    /// Absolute path of a catalog key under this catalog's root.
    pub fn absolute(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Semantic well-formedness: a non-empty root, usable keys, records
    /// satisfying their per-type invariants, and id tables exactly equal to
    /// the pairs observed in the records.
    pub fn validate(&self) -> bool {
        if self.root.as_os_str().is_empty() {
            return false;
        }

        let records_ok = self
            .files
            .iter()
            .all(|(key, record)| is_catalog_key(key) && record.is_well_formed());
        if !records_ok {
            return false;
        }

        let (owners, groups) = derive_tables(&self.files);
        owners == self.owners && groups == self.groups
    }

    /// Compute summary statistics.
    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats::default();
        for (key, record) in &self.files {
            stats.max_depth = stats.max_depth.max(path_depth(key));
            match record.entry_type {
                EntryType::RegularFile => {
                    stats.files += 1;
                    stats.total_size += record.size.unwrap_or(0);
                }
                EntryType::HardLink => stats.hard_links += 1,
                EntryType::SymbolicLink => stats.symlinks += 1,
                EntryType::Directory => stats.dirs += 1,
            }
        }
        stats
    }
}

fn derive_tables(files: &BTreeMap<String, FingerprintRecord>) -> (IdTable, IdTable) {
    let owners = files.values().map(FingerprintRecord::owner).collect();
    let groups = files.values().map(FingerprintRecord::group).collect();
    (owners, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ContentHash, Ownership};

    fn sample() -> Catalog {
        let alice = Ownership::new(1000, "alice", 100, "users");
        let root = Ownership::new(0, "root", 0, "root");
        let mut files = BTreeMap::new();
        files.insert("a".to_string(), FingerprintRecord::directory(0o755, 1, &root));
        files.insert(
            "a/b.txt".to_string(),
            FingerprintRecord::file(0o644, 1, &alice, 5, ContentHash::new([7; 32])),
        );
        Catalog::from_records("/data", files)
    }

    #[test]
    fn test_catalog_key_rules() {
        assert!(is_catalog_key("a"));
        assert!(is_catalog_key("a/b c/d.txt"));
        assert!(!is_catalog_key(""));
        assert!(!is_catalog_key("/a"));
        assert!(!is_catalog_key("a/"));
        assert!(!is_catalog_key("a//b"));
        assert!(!is_catalog_key("./a"));
        assert!(!is_catalog_key("a/../b"));
    }

    #[test]
    fn test_path_depth() {
        assert_eq!(path_depth("a"), 1);
        assert_eq!(path_depth("a/b/file"), 3);
    }

    #[test]
    fn test_tables_are_derived() {
        let catalog = sample();
        assert_eq!(catalog.owners().len(), 2);
        assert!(catalog.owners().contains(&(1000, CompactString::new("alice"))));
        assert!(catalog.groups().contains(&(0, CompactString::new("root"))));
        assert!(catalog.validate());
    }

    #[test]
    fn test_empty_catalog_is_valid() {
        let catalog = Catalog::empty("/data");
        assert!(catalog.is_empty());
        assert!(catalog.validate());
    }

    #[test]
    fn test_empty_root_is_invalid() {
        assert!(!Catalog::empty("").validate());
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.total_size, 5);
        assert_eq!(stats.max_depth, 2);
    }

    #[test]
    fn test_serialized_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        let object = value.as_object().unwrap();
        for key in ["start_point", "uids", "gids", "files"] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(value["uids"][0], serde_json::json!([0, "root"]));
    }

    #[test]
    fn test_tampered_tables_fail_validation() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["uids"] = serde_json::json!([[0, "root"]]);
        let catalog: Catalog = serde_json::from_value(value).unwrap();
        assert!(!catalog.validate());
    }
}
