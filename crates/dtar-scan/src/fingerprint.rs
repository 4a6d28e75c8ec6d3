//! Fingerprint engine: metadata tuple plus content hash for one path.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use compact_str::CompactString;
use thiserror::Error;

use dtar_core::{ContentHash, FingerprintRecord, Warning, WarningKind};

use crate::names::NameCache;

/// Buffer size for streaming reads of small files.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Failure to fingerprint a single entry. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Bytes or metadata could not be read (removed mid-scan, permissions).
    #[error("Unreadable file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Sockets, fifos, device nodes, and non UTF-8 link targets.
    #[error("Unsupported entry {path}: {reason}")]
    Unsupported { path: PathBuf, reason: &'static str },
}

impl FingerprintError {
    fn unreadable(path: &Path, source: io::Error) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Convert into a warning for the scan report.
    pub fn into_warning(self) -> Warning {
        match self {
            Self::Unreadable { path, source } => Warning::unreadable(path, &source),
            Self::Unsupported { ref path, .. } => {
                Warning::new(path.clone(), self.to_string(), WarningKind::MetadataError)
            }
        }
    }
}

/// Computes fingerprint records from the live filesystem.
#[derive(Debug)]
pub struct FingerprintEngine {
    names: NameCache,
    mmap_threshold: u64,
}

impl FingerprintEngine {
    /// Create an engine that memory-maps files of at least `mmap_threshold` bytes.
    pub fn new(mmap_threshold: u64) -> Self {
        Self {
            names: NameCache::new(),
            mmap_threshold,
        }
    }

    /// Fingerprint the entry at `path` without following symbolic links.
    ///
    /// Regular files are always recorded as regular files here; hard link
    /// roles are assigned by the scanner, see [`FingerprintEngine::hard_link`].
    pub fn fingerprint(&self, path: &Path) -> Result<FingerprintRecord, FingerprintError> {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|e| FingerprintError::unreadable(path, e))?;
        let owner = self.names.ownership(metadata.uid(), metadata.gid());
        let mode = metadata.mode();
        let mtime = metadata.mtime();
        let file_type = metadata.file_type();

        if file_type.is_file() {
            let (hash, size) = hash_file(path, self.mmap_threshold)
                .map_err(|e| FingerprintError::unreadable(path, e))?;
            Ok(FingerprintRecord::file(mode, mtime, &owner, size, hash))
        } else if file_type.is_dir() {
            Ok(FingerprintRecord::directory(mode, mtime, &owner))
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(path).map_err(|e| FingerprintError::unreadable(path, e))?;
            let target = target
                .into_os_string()
                .into_string()
                .map_err(|_| FingerprintError::Unsupported {
                    path: path.to_path_buf(),
                    reason: "link target is not valid UTF-8",
                })?;
            Ok(FingerprintRecord::symlink(mode, mtime, &owner, target))
        } else {
            Err(FingerprintError::Unsupported {
                path: path.to_path_buf(),
                reason: "not a regular file, directory, or symbolic link",
            })
        }
    }

    /// Fingerprint an additional path of an inode whose leader has already
    /// been hashed. The bytes are not read again.
    pub fn hard_link(
        &self,
        path: &Path,
        leader_key: &str,
        leader: &FingerprintRecord,
    ) -> Result<FingerprintRecord, FingerprintError> {
        let metadata =
            std::fs::symlink_metadata(path).map_err(|e| FingerprintError::unreadable(path, e))?;
        let (Some(size), Some(hash)) = (leader.size, leader.content_hash) else {
            return Err(FingerprintError::Unsupported {
                path: path.to_path_buf(),
                reason: "hard link leader carries no content",
            });
        };
        let owner = self.names.ownership(metadata.uid(), metadata.gid());
        Ok(FingerprintRecord::hard_link(
            metadata.mode(),
            metadata.mtime(),
            &owner,
            size,
            hash,
            CompactString::new(leader_key),
        ))
    }
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new(128 * 1024)
    }
}

/// Compute the BLAKE3 hash of a whole file. Returns the hash and the number
/// of bytes hashed.
pub fn hash_file(path: &Path, mmap_threshold: u64) -> io::Result<(ContentHash, u64)> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut hasher = Hasher::new();

    if file_size > 0 && file_size >= mmap_threshold {
        // Memory-mapped, multi-threaded hashing for large files
        hasher.update_mmap_rayon(path)?;
    } else {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let bytes_read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok((ContentHash::new(*hasher.finalize().as_bytes()), hasher.count()))
}
