//! Reading and writing the catalog file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use dtar_core::{Catalog, CatalogError, Warning, WarningKind};

use crate::validate::validate_value;

/// File name of the catalog inside the scanned root.
pub const DEFAULT_CATALOG_NAME: &str = ".dtar";

/// What was found at the catalog location.
#[derive(Debug)]
pub enum LoadOutcome {
    /// No catalog file exists.
    Missing,
    /// A file exists but cannot be used.
    Corrupt { reason: String },
    /// A valid catalog.
    Loaded(Catalog),
}

/// A catalog file at a fixed location.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store for catalog `name` inside `root`.
    pub fn in_root(root: impl AsRef<Path>, name: &str) -> Self {
        Self::new(root.as_ref().join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a catalog file exists, valid or not.
    pub fn has_catalog(&self) -> bool {
        self.path.is_file()
    }

    /// Load the catalog, classifying every failure instead of returning it.
    pub fn load(&self) -> LoadOutcome {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadOutcome::Missing,
            Err(e) => return corrupt(format!("unreadable: {e}")),
        };

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => return corrupt(format!("not valid JSON: {e}")),
        };
        if !validate_value(&value) {
            return corrupt("does not match the catalog schema".to_string());
        }

        let catalog: Catalog = match serde_json::from_value(value) {
            Ok(catalog) => catalog,
            Err(e) => return corrupt(format!("malformed record: {e}")),
        };
        if !catalog.validate() {
            return corrupt("inconsistent contents".to_string());
        }

        debug!(path = %self.path.display(), entries = catalog.len(), "Catalog loaded");
        LoadOutcome::Loaded(catalog)
    }

    /// Load the catalog, falling back to the empty catalog for `root`.
    ///
    /// A corrupt catalog yields a warning; a missing one does not. A catalog
    /// stored for a different root is returned as is so the caller can
    /// report the mismatch.
    pub fn load_or_empty(&self, root: impl AsRef<Path>) -> (Catalog, Option<Warning>) {
        match self.load() {
            LoadOutcome::Loaded(catalog) => (catalog, None),
            LoadOutcome::Missing => {
                info!(path = %self.path.display(), "No catalog found, starting from empty");
                (Catalog::empty(root.as_ref()), None)
            }
            LoadOutcome::Corrupt { reason } => {
                let error = CatalogError::CorruptCatalog {
                    path: self.path.clone(),
                    reason,
                };
                warn!("{error}");
                let warning = Warning::new(&self.path, error.to_string(), WarningKind::CorruptCatalog);
                (Catalog::empty(root.as_ref()), Some(warning))
            }
        }
    }

    /// Persist `catalog` atomically.
    ///
    /// The document is written to a temporary file next to the target and
    /// renamed over it, so a failed save leaves any previous catalog intact.
    pub fn save(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        if !catalog.validate() {
            return Err(CatalogError::InvalidCatalog {
                root: catalog.root().to_path_buf(),
            });
        }

        self.write_atomic(catalog).map_err(|source| CatalogError::WriteFailure {
            path: self.path.clone(),
            source,
        })?;

        info!(path = %self.path.display(), entries = catalog.len(), "Catalog saved");
        Ok(())
    }

    fn write_atomic(&self, catalog: &Catalog) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(temp);
        serde_json::to_writer(&mut writer, catalog)?;
        writer.flush()?;

        let temp = writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        // Make the rename durable
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    /// Remove the catalog file if present.
    pub fn delete(&self) -> Result<bool, CatalogError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CatalogError::WriteFailure {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

fn corrupt(reason: String) -> LoadOutcome {
    LoadOutcome::Corrupt { reason }
}
