//! One archive run: load, scan, check, diff, archive, save.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use dtar_catalog::{CatalogStore, check_links};
use dtar_core::{Catalog, ScanError, Warning, WarningKind};
use dtar_diff::{DiffEngine, DiffResult, DiffSummary};
use dtar_scan::Scanner;

use crate::archive::{ArchiveDriver, ArchivePlan};
use crate::config::{LinkPolicy, RunConfig};
use crate::error::RunError;
use crate::script::RemovalScript;

/// Process state a run depends on, read by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preconditions {
    /// The platform has POSIX ownership and permission bits.
    pub posix: bool,
    /// Effective uid of the process.
    pub euid: u32,
}

impl Preconditions {
    pub fn new(posix: bool, euid: u32) -> Self {
        Self { posix, euid }
    }

    fn check(&self, config: &RunConfig) -> Result<(), RunError> {
        if !self.posix {
            return Err(RunError::PlatformUnsupported);
        }
        if config.require_privilege && self.euid != 0 {
            return Err(RunError::InsufficientPrivilege { euid: self.euid });
        }
        Ok(())
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub summary: DiffSummary,
    /// No usable previous catalog; every path was treated as added.
    pub bootstrap: bool,
    pub volumes: Vec<PathBuf>,
    pub entries_written: usize,
    pub bytes_written: u64,
    /// Present when something was removed since the previous run.
    pub script: Option<PathBuf>,
    pub catalog: PathBuf,
    pub warnings: Vec<Warning>,
    /// Entries that changed between the scan and the archive write.
    pub skipped: usize,
    pub duration: Duration,
}

/// Result of [`Session::status`]: the pending diff, nothing written.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub diff: DiffResult,
    pub bootstrap: bool,
    pub warnings: Vec<Warning>,
}

/// Old catalog, new catalog and their diff.
struct Comparison {
    root: PathBuf,
    store: CatalogStore,
    new: Catalog,
    diff: DiffResult,
    bootstrap: bool,
    warnings: Vec<Warning>,
}

/// Drives a run over one root.
pub struct Session {
    config: RunConfig,
    scanner: Scanner,
    driver: ArchiveDriver,
}

impl Session {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            scanner: Scanner::new(),
            driver: ArchiveDriver::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The scanner, for progress subscriptions and cancellation.
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// The archive driver, for progress subscriptions.
    pub fn driver(&self) -> &ArchiveDriver {
        &self.driver
    }

    /// Archive everything that changed since the previous run.
    ///
    /// The new catalog replaces the stored one only after the archive and
    /// the removal script were written.
    pub fn run(&self, preconditions: &Preconditions) -> Result<RunReport, RunError> {
        let started = Instant::now();
        preconditions.check(&self.config)?;

        let Comparison {
            root,
            store,
            new,
            diff,
            bootstrap,
            mut warnings,
        } = self.compare()?;

        let mut plan = ArchivePlan::from_diff(&diff);
        let unreadable = unreadable_keys(&root, &warnings);
        let held = plan.hold_back_removals(&unreadable);
        if held > 0 {
            warn!(held, "Not scripting removals below unreadable directories");
        }
        let outcome = self.driver.write(&plan, &self.config.archive_target(&root))?;
        warnings.extend(outcome.warnings.iter().cloned());

        let script_path = self.config.script_path(&root);
        let script = RemovalScript::write(&script_path, &plan.removals)?.then_some(script_path);

        store.save(&new)?;

        let report = RunReport {
            root,
            summary: diff.summary(),
            bootstrap,
            volumes: outcome.volumes,
            entries_written: outcome.entries_written,
            bytes_written: outcome.bytes_written,
            script,
            catalog: store.path().to_path_buf(),
            warnings,
            skipped: outcome.skipped,
            duration: started.elapsed(),
        };
        info!(
            root = %report.root.display(),
            entries = report.entries_written,
            bytes = report.bytes_written,
            warnings = report.warnings.len(),
            elapsed_ms = report.duration.as_millis() as u64,
            "Run complete"
        );
        Ok(report)
    }

    /// Compute what the next run would archive and remove, writing nothing.
    pub fn status(&self) -> Result<StatusReport, RunError> {
        let comparison = self.compare()?;
        Ok(StatusReport {
            diff: comparison.diff,
            bootstrap: comparison.bootstrap,
            warnings: comparison.warnings,
        })
    }

    fn compare(&self) -> Result<Comparison, RunError> {
        self.config
            .validate()
            .map_err(|message| RunError::InvalidConfig { message })?;

        let root = canonical_root(&self.config.root)?;
        let store = CatalogStore::in_root(&root, &self.config.catalog_name);
        let mut warnings = Vec::new();

        let (mut old, load_warning) = store.load_or_empty(&root);
        let mut bootstrap = load_warning.is_some() || !store.has_catalog();
        warnings.extend(load_warning);

        let outcome = self.scanner.scan(&self.config.scan_config(&root))?;
        let new = outcome.catalog;
        warnings.extend(outcome.warnings);

        let old_report = check_links(&old);
        if !old_report.is_safe() {
            warnings.extend(old_report.to_warnings(&old));
            if self.config.link_policy == LinkPolicy::Strict {
                warn!("Stored catalog has unsafe links; ignoring it");
                old = Catalog::empty(&root);
                bootstrap = true;
            }
        }

        let new_report = check_links(&new);
        if !new_report.is_safe() {
            warnings.extend(new_report.to_warnings(&new));
            if self.config.link_policy == LinkPolicy::Strict {
                return Err(RunError::UnsafeCatalog {
                    count: new_report.issues.len(),
                });
            }
        }

        let (diff, diff_warning) = DiffEngine::new().diff_or_bootstrap(&old, &new);
        if diff_warning.is_some() {
            bootstrap = true;
        }
        warnings.extend(diff_warning);

        Ok(Comparison {
            root,
            store,
            new,
            diff,
            bootstrap,
            warnings,
        })
    }
}

/// Catalog keys of the directories the scan could not list.
fn unreadable_keys(root: &Path, warnings: &[Warning]) -> Vec<String> {
    warnings
        .iter()
        .filter(|w| w.kind == WarningKind::AccessDenied)
        .filter_map(|w| w.path.strip_prefix(root).ok()?.to_str().map(str::to_string))
        .filter(|key| !key.is_empty())
        .collect()
}

fn canonical_root(root: &Path) -> Result<PathBuf, ScanError> {
    let root = fs::canonicalize(root).map_err(|e| ScanError::root(root, e))?;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory { path: root });
    }
    Ok(root)
}
