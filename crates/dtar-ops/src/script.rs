//! Removal script generation.

use std::fmt::Write as _;
use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use dtar_core::EntryType;
use dtar_diff::RemovedEntry;

use crate::error::ArchiveError;

const SCRIPT_MODE: u32 = 0o755;

/// Shell script deleting the paths removed since the previous catalog.
///
/// The script is meant to run from the restored root. Directories are
/// deleted recursively and everything else with a plain `rm -f`, in the
/// order given (deepest first).
pub struct RemovalScript;

impl RemovalScript {
    /// Script text, or `None` when there is nothing to remove.
    pub fn render(entries: &[RemovedEntry]) -> Option<String> {
        if entries.is_empty() {
            return None;
        }

        let mut script = String::from(
            "#!/bin/bash\n\
             if [ \"$EUID\" -ne 0 ]\n\
             then\n  echo \"Please run as root\"\n  exit 1\n\
             fi\n",
        );
        for entry in entries {
            let flags = match entry.entry_type {
                EntryType::Directory => "-rf",
                EntryType::RegularFile | EntryType::HardLink | EntryType::SymbolicLink => "-f",
            };
            let _ = writeln!(script, "rm {flags} -- {}", quote(&format!("./{}", entry.path)));
        }
        Some(script)
    }

    /// Write the script for `entries` to `path` with mode 0755.
    ///
    /// Returns whether a script was written. For an empty list nothing is
    /// written and a script left at `path` by an earlier run is deleted, so
    /// it cannot be replayed against the new archive.
    pub fn write(path: &Path, entries: &[RemovedEntry]) -> Result<bool, ArchiveError> {
        let script_error = |source| ArchiveError::Script {
            path: path.to_path_buf(),
            source,
        };

        let Some(script) = Self::render(entries) else {
            match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Removed stale removal script"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(script_error(e)),
            }
            return Ok(false);
        };

        write_atomic(path, script.as_bytes()).map_err(script_error)?;

        info!(path = %path.display(), removals = entries.len(), "Removal script written");
        Ok(true)
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().set_permissions(Permissions::from_mode(SCRIPT_MODE))?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Single-quote `s` for the shell.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
