//! Archive writing and run orchestration for dtar.
//!
//! This crate turns a diff into outputs and drives complete runs:
//!
//! - **Archive driver**: changed and added entries as tar volumes
//!   (optionally gzip compressed and split by size), written to temp files
//!   and only renamed into place once everything succeeded
//! - **Removal script**: a bash script deleting removed paths, deepest first
//! - **Session**: load the previous catalog, scan, check links, diff,
//!   archive, write the script, then save the new catalog
//!
//! ```rust,no_run
//! use dtar_ops::{Preconditions, RunConfig, Session};
//!
//! let config = RunConfig::builder().root("/srv/data").build().unwrap();
//! let report = Session::new(config).run(&Preconditions::new(true, 0)).unwrap();
//! println!("{} entries in {:?}", report.entries_written, report.volumes);
//! ```

mod archive;
mod config;
mod error;
mod progress;
mod script;
mod session;

pub use archive::{ArchiveDriver, ArchivePlan, ArchiveTarget, PlannedEntry};
pub use config::{
    Compression, DEFAULT_ARCHIVE_NAME, DEFAULT_SCRIPT_NAME, LinkPolicy, RunConfig, RunConfigBuilder,
};
pub use error::{ArchiveError, RunError};
pub use progress::{ArchiveOutcome, ArchiveProgress};
pub use script::RemovalScript;
pub use session::{Preconditions, RunReport, Session, StatusReport};
