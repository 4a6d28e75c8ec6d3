//! Progress reporting types for archive writing.

use std::path::PathBuf;

use serde::Serialize;

use dtar_core::Warning;

/// Progress information while an archive is written.
#[derive(Debug, Clone)]
pub struct ArchiveProgress {
    /// Entries written so far.
    pub entries_written: usize,
    /// Entries in the plan.
    pub entries_total: usize,
    /// File bytes written so far.
    pub bytes_written: u64,
    /// File bytes in the plan (may exceed what is written if files vanish).
    pub bytes_total: u64,
    /// 1-based number of the volume being written.
    pub volume: usize,
    /// The entry currently being written.
    pub current_path: Option<PathBuf>,
}

impl ArchiveProgress {
    pub fn new(entries_total: usize, bytes_total: u64) -> Self {
        Self {
            entries_written: 0,
            entries_total,
            bytes_written: 0,
            bytes_total,
            volume: 1,
            current_path: None,
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_written as f64 / self.bytes_total as f64 * 100.0).min(100.0)
        } else if self.entries_total > 0 {
            self.entries_written as f64 / self.entries_total as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Increment the written count and add bytes.
    pub fn complete_entry(&mut self, bytes: u64) {
        self.entries_written += 1;
        self.bytes_written += bytes;
    }
}

/// Result of a completed archive write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveOutcome {
    /// Volumes in order; a single path unless chunking was requested.
    pub volumes: Vec<PathBuf>,
    pub entries_written: usize,
    /// File bytes stored (headers and padding excluded).
    pub bytes_written: u64,
    /// Entries that vanished or became unreadable before they were written.
    pub skipped: usize,
    pub warnings: Vec<Warning>,
}

impl ArchiveOutcome {
    /// Whether every planned entry made it into the archive.
    pub fn is_consistent(&self) -> bool {
        self.skipped == 0
    }

    /// Get a human-readable summary of the write.
    pub fn summary(&self) -> String {
        let volumes = match self.volumes.len() {
            1 => "1 volume".to_string(),
            n => format!("{n} volumes"),
        };
        if self.skipped == 0 {
            format!("Wrote {} entries in {volumes}", self.entries_written)
        } else {
            format!(
                "Wrote {} entries in {volumes}, {} skipped",
                self.entries_written, self.skipped
            )
        }
    }
}
