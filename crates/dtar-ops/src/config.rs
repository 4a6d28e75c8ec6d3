//! Run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use dtar_catalog::DEFAULT_CATALOG_NAME;
use dtar_core::ScanConfig;

use crate::archive::ArchiveTarget;

/// Default base name of the archive.
pub const DEFAULT_ARCHIVE_NAME: &str = "diff";

/// Default name of the removal script.
pub const DEFAULT_SCRIPT_NAME: &str = "dtar_rm.sh";

/// Compression applied to every archive volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// File extension of a volume, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "tar",
            Self::Gzip => "tar.gz",
        }
    }
}

/// What to do with catalogs containing links that escape the root or dangle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkPolicy {
    /// Report each unsafe link as a warning and carry on.
    #[default]
    Warn,
    /// Ignore an unsafe stored catalog and refuse to archive an unsafe tree.
    Strict,
}

/// Configuration for one archive run.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct RunConfig {
    /// Directory to snapshot.
    pub root: PathBuf,

    /// Base name of the archive (`<name>.tar`, `<name>.001.tar`, ...).
    #[builder(default = "DEFAULT_ARCHIVE_NAME.to_string()")]
    pub archive_name: String,

    /// Where the archive and removal script go; the root when unset.
    #[builder(default, setter(strip_option))]
    pub output_dir: Option<PathBuf>,

    #[builder(default = "DEFAULT_CATALOG_NAME.to_string()")]
    pub catalog_name: String,

    #[builder(default = "DEFAULT_SCRIPT_NAME.to_string()")]
    pub script_name: String,

    #[builder(default)]
    pub compression: Compression,

    /// Split the archive into volumes of at most this many bytes.
    #[builder(default, setter(strip_option))]
    pub chunk_size: Option<u64>,

    #[builder(default)]
    pub link_policy: LinkPolicy,

    /// Refuse to run unless the effective uid is 0.
    #[builder(default = "true")]
    pub require_privilege: bool,

    /// Extra exclude globs, relative to the root.
    #[builder(default)]
    pub exclude: Vec<String>,

    /// Hashing threads (0 = auto-detect, 1 = sequential).
    #[builder(default = "0")]
    pub threads: usize,
}

/// Characters that would turn a file name into a glob pattern.
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '\\'];

fn check_file_name(what: &str, name: &str) -> Result<(), String> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(format!("{what} must be a plain file name, got '{name}'"));
    }
    if name.contains(GLOB_META) {
        return Err(format!("{what} cannot contain glob characters: '{name}'"));
    }
    Ok(())
}

impl RunConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            Some(_) => {}
        }
        if let Some(ref name) = self.archive_name {
            check_file_name("Archive name", name)?;
        }
        if let Some(ref name) = self.catalog_name {
            check_file_name("Catalog name", name)?;
        }
        if let Some(ref name) = self.script_name {
            check_file_name("Script name", name)?;
        }
        if let Some(Some(0)) = self.chunk_size {
            return Err("Chunk size must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl RunConfig {
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Defaults for snapshotting `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            output_dir: None,
            catalog_name: DEFAULT_CATALOG_NAME.to_string(),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
            compression: Compression::None,
            chunk_size: None,
            link_policy: LinkPolicy::Warn,
            require_privilege: true,
            exclude: Vec::new(),
            threads: 0,
        }
    }

    /// Check a config that was built without the builder.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("Root path cannot be empty".to_string());
        }
        check_file_name("Archive name", &self.archive_name)?;
        check_file_name("Catalog name", &self.catalog_name)?;
        check_file_name("Script name", &self.script_name)?;
        if self.chunk_size == Some(0) {
            return Err("Chunk size must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Directory receiving the archive and the script, under `root`
    /// unless configured otherwise.
    ///
    /// A configured directory is resolved against the working directory and
    /// through symbolic links when it exists, so it can be compared with
    /// the canonical root.
    pub fn output_dir_in(&self, root: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) => fs::canonicalize(dir).unwrap_or_else(|_| dir.clone()),
            None => root.to_path_buf(),
        }
    }

    /// Archive destination for a run over `root`.
    pub fn archive_target(&self, root: &Path) -> ArchiveTarget {
        ArchiveTarget {
            dir: self.output_dir_in(root),
            name: self.archive_name.clone(),
            compression: self.compression,
            chunk_size: self.chunk_size,
        }
    }

    pub fn script_path(&self, root: &Path) -> PathBuf {
        self.output_dir_in(root).join(&self.script_name)
    }

    /// Scan configuration for `root` that leaves out everything a run
    /// writes: the catalog, the archive volumes and the removal script.
    /// Volumes are excluded in both compressed and plain form, since an
    /// earlier run may have used the other one.
    pub fn scan_config(&self, root: &Path) -> ScanConfig {
        let mut exclude = self.exclude.clone();
        exclude.push(self.catalog_name.clone());

        let output = self.output_dir_in(root);
        if let Some(prefix) = relative_prefix(root, &output) {
            for extension in [Compression::None, Compression::Gzip].map(Compression::extension) {
                exclude.push(format!("{prefix}{}.{extension}", self.archive_name));
                exclude.push(format!("{prefix}{}.[0-9][0-9][0-9]*.{extension}", self.archive_name));
            }
            exclude.push(format!("{prefix}{}", self.script_name));
        }

        ScanConfig {
            exclude,
            threads: self.threads,
            ..ScanConfig::new(root)
        }
    }
}

/// `dir` relative to `root` as a glob prefix (`""` or `"a/b/"`), or `None`
/// when `dir` is outside the root.
fn relative_prefix(root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?.to_str()?;
    if relative.is_empty() {
        Some(String::new())
    } else if relative.contains(GLOB_META) {
        None
    } else {
        Some(format!("{relative}/"))
    }
}
