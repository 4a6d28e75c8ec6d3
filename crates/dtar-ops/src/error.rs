//! Errors from writing outputs and running the pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use dtar_core::{CatalogError, ScanError};

/// Failure while producing an archive or removal script.
///
/// Nothing is left at the destination when one of these is returned.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to write archive {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {path} for the archive: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write removal script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Unsupported platform: POSIX ownership and permission bits are required")]
    PlatformUnsupported,

    #[error("Insufficient privilege: running as uid {euid}, root is required")]
    InsufficientPrivilege { euid: u32 },

    /// Links in the fresh catalog escape the root or dangle.
    #[error("Unsafe catalog: {count} link(s) escape the root or dangle")]
    UnsafeCatalog { count: usize },

    #[error("Invalid run configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
