//! Catalog persistence and checks for dtar.
//!
//! - **Store**: one JSON catalog file per root (`.dtar` by default),
//!   loaded best-effort and saved atomically
//! - **Validation**: schema conformance of the raw document, then semantic
//!   consistency of the typed catalog
//! - **Link safety**: symbolic links must resolve inside the root to an
//!   entry that exists in the catalog
//!
//! A catalog that cannot be loaded or fails validation is treated exactly
//! like a missing one: the next run bootstraps from the empty catalog.
//!
//! ```rust,no_run
//! use dtar_catalog::{CatalogStore, check_links};
//!
//! let store = CatalogStore::in_root("/srv/data", ".dtar");
//! let (catalog, warning) = store.load_or_empty("/srv/data");
//! if let Some(warning) = warning {
//!     eprintln!("{warning}");
//! }
//! let report = check_links(&catalog);
//! println!("{} unsafe links", report.issues.len());
//! ```

mod safety;
mod store;
mod validate;

pub use safety::{LinkIssue, LinkIssueKind, SafetyReport, check_links, is_good_catalog};
pub use store::{CatalogStore, DEFAULT_CATALOG_NAME, LoadOutcome};
pub use validate::validate_value;

pub use dtar_core::{Catalog, CatalogError};
