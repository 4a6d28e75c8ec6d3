//! Filesystem scanning and fingerprinting for dtar.
//!
//! This crate turns a directory tree into a [`Catalog`]:
//!
//! - **Two passes**: paths are enumerated first (cheap) so the byte total
//!   is known before the expensive hashing pass starts
//! - **Fingerprints**: permission bits, ownership (ids and names), size,
//!   whole-second mtime, entry type, link target, BLAKE3 content hash
//! - **Hard links**: the smallest path of a multiply-linked inode is the
//!   regular file, the others link to it and reuse its hash
//! - **Never follows symlinks**, so traversal cannot leave the root or loop
//!
//! # Example
//!
//! ```rust,no_run
//! use dtar_scan::{ScanConfig, Scanner};
//!
//! let outcome = Scanner::new().scan(&ScanConfig::new("/srv/data")).unwrap();
//!
//! println!("Entries: {}", outcome.catalog.len());
//! for warning in &outcome.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! ```
//!
//! # Progress Monitoring
//!
//! ```rust,no_run
//! use dtar_scan::Scanner;
//!
//! let scanner = Scanner::new();
//! let mut progress_rx = scanner.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(progress) = progress_rx.blocking_recv() {
//!         println!("{:.1}%", progress.percentage());
//!     }
//! });
//! ```

mod fingerprint;
mod inode;
mod names;
mod progress;
mod scanner;

pub use fingerprint::{FingerprintEngine, FingerprintError, hash_file};
pub use inode::HardlinkTracker;
pub use names::NameCache;
pub use progress::{ScanPhase, ScanProgress};
pub use scanner::{Enumeration, PendingEntry, PendingKind, ScanOutcome, Scanner};

// Re-export core types for convenience
pub use dtar_core::{Catalog, FingerprintRecord, ScanConfig, ScanError, Warning, WarningKind};
