//! Two-pass catalog scanner.
//!
//! Pass one enumerates paths with jwalk (cheap: one `lstat` per entry) and
//! totals the bytes that will need hashing. Pass two fingerprints every
//! entry, optionally in parallel, and assembles the catalog. Nothing is
//! shared between the passes except the immutable [`Enumeration`].

use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use jwalk::{Parallelism, WalkDir};
use rayon::prelude::*;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use dtar_core::{
    Catalog, EntryType, FingerprintRecord, InodeInfo, ScanConfig, ScanError, Warning, WarningKind,
    is_catalog_key,
};

use crate::fingerprint::{FingerprintEngine, FingerprintError};
use crate::inode::HardlinkTracker;
use crate::progress::{ScanPhase, ScanProgress};

/// Send a progress update every this many entries.
const PROGRESS_INTERVAL: u64 = 256;

/// Role of an enumerated entry, decided before any bytes are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingKind {
    File,
    /// Later path of an inode already claimed by `leader`.
    HardLink { leader: String },
    Symlink,
    Directory,
}

/// A path discovered by the enumeration pass.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Catalog key (relative, `/` separated).
    pub key: String,
    /// Absolute path.
    pub path: PathBuf,
    pub kind: PendingKind,
    /// Size at enumeration time (regular files only).
    pub size: u64,
}

/// Result of the enumeration pass: every entry, sorted by key.
#[derive(Debug)]
pub struct Enumeration {
    /// Canonical root path.
    pub root: PathBuf,
    pub entries: Vec<PendingEntry>,
    /// Bytes the fingerprint pass will hash.
    pub total_bytes: u64,
    pub warnings: Vec<Warning>,
    pub started_at: Instant,
}

/// A completed scan.
#[derive(Debug)]
pub struct ScanOutcome {
    pub catalog: Catalog,
    /// Per-path problems; the affected paths are not in the catalog.
    pub warnings: Vec<Warning>,
    pub duration: Duration,
}

/// Builds catalogs from the live filesystem.
pub struct Scanner {
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            progress_tx,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Flag that stops the scan between files when set.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Scan a tree into a catalog: enumerate, then fingerprint.
    pub fn scan(&self, config: &ScanConfig) -> Result<ScanOutcome, ScanError> {
        let enumeration = self.enumerate(config)?;
        info!(
            root = %enumeration.root.display(),
            entries = enumeration.entries.len(),
            bytes = enumeration.total_bytes,
            "Enumerated tree"
        );
        let outcome = self.fingerprint(config, enumeration)?;
        info!(
            entries = outcome.catalog.len(),
            warnings = outcome.warnings.len(),
            elapsed_ms = outcome.duration.as_millis() as u64,
            "Catalog built"
        );
        Ok(outcome)
    }

    /// Pass one: list every regular file, directory, and link under the
    /// root, assign hard link roles, and total the bytes to hash.
    pub fn enumerate(&self, config: &ScanConfig) -> Result<Enumeration, ScanError> {
        let started_at = Instant::now();
        let root_path = config
            .root
            .canonicalize()
            .map_err(|e| ScanError::root(&config.root, e))?;

        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory { path: root_path });
        }

        // An unreadable root is fatal; unreadable subtrees are only warnings
        std::fs::read_dir(&root_path).map_err(|e| ScanError::root(&root_path, e))?;
        let root_metadata = std::fs::metadata(&root_path).map_err(|e| ScanError::root(&root_path, e))?;
        let root_device = root_metadata.dev();

        let excludes = build_excludes(&config.exclude)?;
        let prune_root = root_path.clone();

        let walker = WalkDir::new(&root_path)
            .parallelism(Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            })
            .sort(true)
            .skip_hidden(!config.include_hidden)
            .follow_links(false)
            .min_depth(1)
            .process_read_dir(move |_depth, dir_path, _state, children| {
                children.retain(|child| match child {
                    Ok(entry) => {
                        let path = dir_path.join(&entry.file_name);
                        !relative_key(&prune_root, &path).is_some_and(|key| excludes.is_match(&key))
                    }
                    Err(_) => true,
                });
            });

        let mut entries = Vec::new();
        let mut warnings = Vec::new();
        let mut inodes = Vec::new();

        for entry_result in walker {
            if self.is_cancelled() {
                return Err(ScanError::Interrupted);
            }

            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root_path.clone());
                    push_warning(
                        &mut warnings,
                        Warning::new(path, err.to_string(), WarningKind::AccessDenied),
                    );
                    continue;
                }
            };

            let path = entry.path();
            let Some(key) = relative_key(&root_path, &path) else {
                push_warning(
                    &mut warnings,
                    Warning::new(&path, "Path is not valid UTF-8", WarningKind::MetadataError),
                );
                continue;
            };

            // The directory itself is recorded; its unreadable contents are not
            if let Some(err) = &entry.read_children_error {
                let warning = match err.io_error() {
                    Some(io) => Warning::access(&path, io),
                    None => Warning::new(&path, err.to_string(), WarningKind::AccessDenied),
                };
                push_warning(&mut warnings, warning);
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    push_warning(
                        &mut warnings,
                        Warning::new(&path, err.to_string(), WarningKind::MetadataError),
                    );
                    continue;
                }
            };

            if !config.cross_filesystems && metadata.dev() != root_device {
                debug!(path = %path.display(), "Skipping entry on another filesystem");
                continue;
            }

            let file_type = metadata.file_type();
            let kind = if file_type.is_dir() {
                PendingKind::Directory
            } else if file_type.is_symlink() {
                PendingKind::Symlink
            } else if file_type.is_file() {
                PendingKind::File
            } else {
                debug!(path = %path.display(), "Skipping special file");
                continue;
            };

            let size = if kind == PendingKind::File { metadata.len() } else { 0 };
            let inode = (kind == PendingKind::File && metadata.nlink() > 1)
                .then(|| InodeInfo::new(metadata.ino(), metadata.dev()));

            entries.push(PendingEntry { key, path, kind, size });
            inodes.push(inode);

            let found = entries.len() as u64;
            if found % PROGRESS_INTERVAL == 0 {
                let _ = self.progress_tx.send(ScanProgress {
                    entries: found,
                    current_path: entries[entries.len() - 1].path.clone(),
                    warnings_count: warnings.len() as u64,
                    elapsed: started_at.elapsed(),
                    ..ScanProgress::new(ScanPhase::Enumerating)
                });
            }
        }

        // Sort by key so hard link leaders do not depend on traversal order
        let mut paired: Vec<(PendingEntry, Option<InodeInfo>)> = entries.into_iter().zip(inodes).collect();
        paired.sort_by(|a, b| a.0.key.cmp(&b.0.key));

        let tracker = HardlinkTracker::new();
        let mut entries = Vec::with_capacity(paired.len());
        for (mut entry, inode) in paired {
            if let Some(info) = inode {
                if let Some(leader) = tracker.claim(info, &entry.key) {
                    entry.kind = PendingKind::HardLink { leader };
                }
            }
            entries.push(entry);
        }

        let total_bytes = entries
            .iter()
            .filter(|e| e.kind == PendingKind::File)
            .map(|e| e.size)
            .sum();

        Ok(Enumeration {
            root: root_path,
            entries,
            total_bytes,
            warnings,
            started_at,
        })
    }

    /// Pass two: fingerprint every enumerated entry and build the catalog.
    ///
    /// The resulting catalog is identical whatever the thread count.
    pub fn fingerprint(
        &self,
        config: &ScanConfig,
        enumeration: Enumeration,
    ) -> Result<ScanOutcome, ScanError> {
        let Enumeration {
            root,
            entries,
            total_bytes,
            mut warnings,
            started_at,
        } = enumeration;

        let engine = FingerprintEngine::new(config.mmap_threshold);
        let (links, direct): (Vec<PendingEntry>, Vec<PendingEntry>) = entries
            .into_iter()
            .partition(|e| matches!(e.kind, PendingKind::HardLink { .. }));

        let processed = AtomicU64::new(0);
        let bytes_processed = AtomicU64::new(0);
        let warnings_so_far = warnings.len() as u64;

        let fingerprint_one = |entry: &PendingEntry| -> Option<Result<FingerprintRecord, FingerprintError>> {
            if self.is_cancelled() {
                return None;
            }
            let result = engine.fingerprint(&entry.path);
            if let Ok(record) = &result {
                debug!(key = %entry.key, kind = %record.entry_type, "Fingerprinted");
            }

            let bytes = bytes_processed.fetch_add(entry.size, Ordering::Relaxed) + entry.size;
            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if count % PROGRESS_INTERVAL == 0 || entry.size >= config.mmap_threshold {
                let _ = self.progress_tx.send(ScanProgress {
                    phase: ScanPhase::Fingerprinting,
                    entries: count,
                    bytes_processed: bytes,
                    bytes_total: total_bytes,
                    current_path: entry.path.clone(),
                    warnings_count: warnings_so_far,
                    elapsed: started_at.elapsed(),
                });
            }
            Some(result)
        };

        let results: Vec<Option<Result<FingerprintRecord, FingerprintError>>> = if config.threads == 1 {
            direct.iter().map(fingerprint_one).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .build()
                .map_err(|e| ScanError::InvalidConfig {
                    message: format!("Cannot build hashing pool: {e}"),
                })?;
            pool.install(|| direct.par_iter().map(fingerprint_one).collect())
        };

        if self.is_cancelled() {
            return Err(ScanError::Interrupted);
        }

        let mut files = BTreeMap::new();
        for (entry, result) in direct.into_iter().zip(results) {
            match result {
                Some(Ok(record)) => {
                    files.insert(entry.key, record);
                }
                Some(Err(err)) => push_warning(&mut warnings, err.into_warning()),
                None => return Err(ScanError::Interrupted),
            }
        }

        for link in links {
            let PendingKind::HardLink { leader } = &link.kind else {
                continue;
            };
            let result = match files.get(leader.as_str()) {
                Some(leader_record) if leader_record.entry_type == EntryType::RegularFile => {
                    engine.hard_link(&link.path, leader, leader_record)
                }
                _ => Err(FingerprintError::Unsupported {
                    path: link.path.clone(),
                    reason: "hard link leader was dropped from the catalog",
                }),
            };
            match result {
                Ok(record) => {
                    files.insert(link.key, record);
                }
                Err(err) => push_warning(&mut warnings, err.into_warning()),
            }
        }

        let _ = self.progress_tx.send(ScanProgress {
            phase: ScanPhase::Fingerprinting,
            entries: files.len() as u64,
            bytes_processed: bytes_processed.load(Ordering::Relaxed),
            bytes_total: total_bytes,
            current_path: root.clone(),
            warnings_count: warnings.len() as u64,
            elapsed: started_at.elapsed(),
        });

        Ok(ScanOutcome {
            catalog: Catalog::from_records(root, files),
            warnings,
            duration: started_at.elapsed(),
        })
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog key of `path` under `root`, if it is a valid UTF-8 descendant.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let key = path.strip_prefix(root).ok()?.to_str()?;
    is_catalog_key(key).then(|| key.to_string())
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ScanError::InvalidConfig {
                message: format!("Invalid exclude pattern '{pattern}': {e}"),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::InvalidConfig {
        message: e.to_string(),
    })
}

fn push_warning(warnings: &mut Vec<Warning>, warning: Warning) {
    warn!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("dir1")).unwrap();
        fs::create_dir(root.join("dir2")).unwrap();
        fs::create_dir(root.join("dir1/subdir")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world world world").unwrap();
        fs::write(root.join("dir1/subdir/file3.txt"), "test").unwrap();
        fs::write(root.join("dir2/file4.txt"), "another file here").unwrap();

        temp
    }

    #[test]
    fn test_basic_scan() {
        let temp = create_test_tree();
        let outcome = Scanner::new().scan(&ScanConfig::new(temp.path())).unwrap();
        let catalog = &outcome.catalog;

        assert_eq!(catalog.len(), 7);
        assert!(catalog.contains("dir1/subdir/file3.txt"));
        assert_eq!(catalog.get("dir1").unwrap().entry_type, EntryType::Directory);
        assert_eq!(catalog.get("file1.txt").unwrap().size, Some(5));
        assert!(catalog.validate());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_enumeration_totals_bytes() {
        let temp = create_test_tree();
        let enumeration = Scanner::new().enumerate(&ScanConfig::new(temp.path())).unwrap();

        assert_eq!(enumeration.total_bytes, 5 + 17 + 4 + 17);
        let keys: Vec<&str> = enumeration.entries.iter().map(|e| e.key.as_str()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_exclude_prunes_subtree() {
        let temp = create_test_tree();
        let config = ScanConfig::builder()
            .root(temp.path())
            .exclude(vec!["dir1".to_string(), "*.txt".to_string()])
            .build()
            .unwrap();

        let catalog = Scanner::new().scan(&config).unwrap().catalog;
        assert!(!catalog.contains("dir1"));
        assert!(!catalog.contains("dir1/file2.txt"));
        assert!(!catalog.contains("file1.txt"));
        // `*.txt` is anchored at the root level
        assert!(catalog.contains("dir2/file4.txt"));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let temp = create_test_tree();
        let config = ScanConfig::new(temp.path()).with_excludes(vec!["[".to_string()]);
        assert!(matches!(
            Scanner::new().scan(&config),
            Err(ScanError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_symlinks_are_recorded_not_followed() {
        let temp = create_test_tree();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();

        let catalog = Scanner::new().scan(&ScanConfig::new(temp.path())).unwrap().catalog;
        let link = catalog.get("escape").unwrap();
        assert_eq!(link.entry_type, EntryType::SymbolicLink);
        assert!(!catalog.contains("escape/secret"));
    }

    #[test]
    fn test_hard_links_get_a_single_leader() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("b.txt"), "same bytes").unwrap();
        fs::hard_link(temp.path().join("b.txt"), temp.path().join("a.txt")).unwrap();
        fs::hard_link(temp.path().join("b.txt"), temp.path().join("c.txt")).unwrap();

        let catalog = Scanner::new().scan(&ScanConfig::new(temp.path())).unwrap().catalog;
        let leader = catalog.get("a.txt").unwrap();
        assert_eq!(leader.entry_type, EntryType::RegularFile);
        for key in ["b.txt", "c.txt"] {
            let link = catalog.get(key).unwrap();
            assert_eq!(link.entry_type, EntryType::HardLink);
            assert_eq!(link.link_target.as_str(), "a.txt");
            assert_eq!(link.content_hash, leader.content_hash);
        }
    }

    #[test]
    fn test_thread_count_does_not_change_catalog() {
        let temp = create_test_tree();
        let sequential = ScanConfig::builder().root(temp.path()).threads(1usize).build().unwrap();
        let parallel = ScanConfig::builder().root(temp.path()).threads(4usize).build().unwrap();

        let a = Scanner::new().scan(&sequential).unwrap().catalog;
        let b = Scanner::new().scan(&parallel).unwrap().catalog;
        assert_eq!(a, b);
    }

    #[test]
    fn test_unreadable_subtree_is_reported() {
        // Permission bits do not stop root
        if uzers::get_effective_uid() == 0 {
            return;
        }
        use std::os::unix::fs::PermissionsExt;

        let temp = create_test_tree();
        let locked = temp.path().join("dir1");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let result = Scanner::new().scan(&ScanConfig::new(temp.path()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = result.unwrap();
        assert!(outcome.catalog.contains("dir1"));
        assert!(!outcome.catalog.contains("dir1/file2.txt"));
        assert!(outcome.catalog.contains("dir2/file4.txt"));

        let denied: Vec<_> = outcome
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::AccessDenied)
            .collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].path, locked.canonicalize().unwrap());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let config = ScanConfig::new(temp.path().join("nope"));
        assert!(matches!(
            Scanner::new().scan(&config),
            Err(ScanError::RootUnreadable { .. })
        ));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp = create_test_tree();
        let config = ScanConfig::new(temp.path().join("file1.txt"));
        assert!(matches!(
            Scanner::new().scan(&config),
            Err(ScanError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_cancelled_scan_is_interrupted() {
        let temp = create_test_tree();
        let scanner = Scanner::new();
        scanner.cancel_handle().store(true, Ordering::Relaxed);
        assert!(matches!(
            scanner.scan(&ScanConfig::new(temp.path())),
            Err(ScanError::Interrupted)
        ));
    }

    #[test]
    fn test_progress_is_broadcast() {
        let temp = create_test_tree();
        let scanner = Scanner::new();
        let mut rx = scanner.subscribe();
        scanner.scan(&ScanConfig::new(temp.path())).unwrap();

        let mut last = None;
        while let Ok(progress) = rx.try_recv() {
            last = Some(progress);
        }
        let last = last.unwrap();
        assert_eq!(last.phase, ScanPhase::Fingerprinting);
        assert_eq!(last.bytes_total, 5 + 17 + 4 + 17);
        assert_eq!(last.bytes_processed, last.bytes_total);
    }
}
