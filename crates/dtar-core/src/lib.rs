//! Core types for dtar.
//!
//! This crate provides the data model shared by every stage of a
//! differential archive run: fingerprint records, catalogs (snapshots of a
//! directory tree), scan configuration, and the error/warning taxonomy.

mod catalog;
mod config;
mod error;
mod record;

pub use catalog::{Catalog, CatalogStats, IdTable, is_catalog_key, path_depth};
pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::{CatalogError, ScanError, Warning, WarningKind};
pub use record::{ContentHash, EntryType, FingerprintRecord, InodeInfo, Ownership, SIZE_SENTINEL};
