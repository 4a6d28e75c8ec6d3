//! Catalog comparison for dtar.
//!
//! Given the catalog saved by the previous run and the catalog of the tree
//! as it is now, every path lands in exactly one of four sets:
//!
//! - **changed**: in both, with a different mode, owner, group, size, type,
//!   link target or content hash (the modification time is not compared)
//! - **added**: only in the new catalog
//! - **removed**: only in the old catalog, ordered deepest first so that a
//!   directory is always deleted after its contents
//! - **unchanged**: in both, with equal records
//!
//! ```rust,no_run
//! use dtar_core::Catalog;
//! use dtar_diff::DiffEngine;
//!
//! # fn catalogs() -> (Catalog, Catalog) { unimplemented!() }
//! let (old, new) = catalogs();
//! let (diff, warning) = DiffEngine::new().diff_or_bootstrap(&old, &new);
//! let summary = diff.summary();
//! println!("{} to archive, {} to remove", summary.to_archive(), summary.removed);
//! ```

mod diff;
mod removal;

pub use diff::{DiffEngine, DiffResult, DiffSummary, state_changed};
pub use removal::{RemovedEntry, removal_cmp, removal_order};

// Re-export core types
pub use dtar_core::{Catalog, EntryType, FingerprintRecord};
