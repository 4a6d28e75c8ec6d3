//! Scan progress reporting.

use std::path::PathBuf;
use std::time::Duration;

/// Which pass of the scan is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Cheap enumeration of paths and sizes.
    Enumerating,
    /// Metadata extraction and content hashing.
    Fingerprinting,
}

/// Progress information during a scan.
///
/// During fingerprinting `bytes_total` is known from the enumeration pass,
/// so `percentage()` reflects bytes hashed rather than files visited.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    /// Entries discovered (enumeration) or fingerprinted (fingerprinting).
    pub entries: u64,
    /// Bytes hashed so far.
    pub bytes_processed: u64,
    /// Total bytes to hash; zero while enumerating.
    pub bytes_total: u64,
    /// Current path being scanned.
    pub current_path: PathBuf,
    /// Number of warnings encountered.
    pub warnings_count: u64,
    /// Time elapsed since scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Create initial progress state.
    pub fn new(phase: ScanPhase) -> Self {
        Self {
            phase,
            entries: 0,
            bytes_processed: 0,
            bytes_total: 0,
            current_path: PathBuf::new(),
            warnings_count: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Progress as a percentage of bytes (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_processed as f64 / self.bytes_total as f64 * 100.0).min(100.0)
        } else {
            0.0
        }
    }

    /// Calculate hashing rate in bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.bytes_processed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new(ScanPhase::Enumerating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_is_byte_based() {
        let mut progress = ScanProgress::new(ScanPhase::Fingerprinting);
        progress.entries = 999;
        progress.bytes_total = 1000;
        progress.bytes_processed = 250;
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentage_without_total() {
        assert_eq!(ScanProgress::default().percentage(), 0.0);
    }

    #[test]
    fn test_rate_requires_elapsed_time() {
        let mut progress = ScanProgress::new(ScanPhase::Fingerprinting);
        progress.bytes_processed = 100;
        assert_eq!(progress.bytes_per_second(), 0.0);
        progress.elapsed = Duration::from_secs(2);
        assert_eq!(progress.bytes_per_second(), 50.0);
    }
}
