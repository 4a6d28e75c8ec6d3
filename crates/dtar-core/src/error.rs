//! Error and warning types shared across the pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors that stop a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The root itself cannot be read; nothing can be scanned.
    #[error("Root directory is unreadable: {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The scan was cancelled between files.
    #[error("Scan interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ScanError {
    /// Create a root error with path context.
    pub fn root(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::RootUnreadable {
            path: path.into(),
            source,
        }
    }
}

/// Errors from catalog persistence and comparison.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A stored catalog could not be read or failed validation.
    #[error("Corrupt catalog {path}: {reason}")]
    CorruptCatalog { path: PathBuf, reason: String },

    /// The two catalogs describe different roots.
    #[error("Catalogs are incomparable: {old} vs {new}")]
    IncomparableCatalogs { old: PathBuf, new: PathBuf },

    /// Refused to persist a catalog that fails validation.
    #[error("Refusing to save invalid catalog for {root}")]
    InvalidCatalog { root: PathBuf },

    /// Writing the catalog failed; no partial file was left behind.
    #[error("Failed to write catalog {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// A subtree or entry could not be read (permission denied or similar).
    AccessDenied,
    /// File bytes could not be read after enumeration.
    UnreadableFile,
    /// Error reading metadata.
    MetadataError,
    /// Symbolic link target does not exist.
    BrokenSymlink,
    /// Link escapes the root or dangles (catalog link safety check).
    UnsafeLink,
    /// A path selected for the archive disappeared before it was written.
    Vanished,
    /// The stored catalog was unreadable or invalid; bootstrap was used.
    CorruptCatalog,
    /// The stored catalog has a different root; bootstrap was used.
    IncomparableCatalogs,
}

/// Non-fatal condition reported to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl Warning {
    /// Create a new warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create an access warning from an I/O error.
    pub fn access(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        Self {
            message: format!("Cannot access {}: {error}", path.display()),
            path,
            kind: WarningKind::AccessDenied,
        }
    }

    /// Create an unreadable file warning.
    pub fn unreadable(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        Self {
            message: format!("Unreadable file {}: {error}", path.display()),
            path,
            kind: WarningKind::UnreadableFile,
        }
    }

    /// Create a broken symlink warning.
    pub fn broken_symlink(path: impl Into<PathBuf>, target: &str) -> Self {
        let path = path.into();
        Self {
            message: format!("Broken symlink: {} -> {target}", path.display()),
            path,
            kind: WarningKind::BrokenSymlink,
        }
    }

    /// Create a vanished path warning.
    pub fn vanished(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        Self {
            message: format!("Skipped {}: {error}", path.display()),
            path,
            kind: WarningKind::Vanished,
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_warning() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let warning = Warning::access("/test/path", &err);
        assert_eq!(warning.kind, WarningKind::AccessDenied);
        assert!(warning.message.contains("/test/path"));
    }

    #[test]
    fn test_broken_symlink_warning() {
        let warning = Warning::broken_symlink("/test/link", "missing");
        assert_eq!(warning.kind, WarningKind::BrokenSymlink);
        assert!(warning.to_string().contains("-> missing"));
    }

    #[test]
    fn test_root_error_message() {
        let err = ScanError::root(
            "/root",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ScanError::RootUnreadable { .. }));
        assert!(err.to_string().contains("unreadable"));
    }
}
