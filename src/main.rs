//! dtar - differential directory archiver.
//!
//! Usage:
//!   dtar [PATH]              Archive what changed since the last run
//!   dtar archive [PATH]      Same, with options
//!   dtar status [PATH]       Show what the next run would archive
//!   dtar catalog [PATH]      Print a fresh catalog as JSON
//!   dtar check [PATH]        Validate the stored catalog
//!   dtar --help              Show help

mod logging;

use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};

use dtar_catalog::{CatalogStore, DEFAULT_CATALOG_NAME, LoadOutcome, check_links};
use dtar_ops::{
    Compression, DEFAULT_ARCHIVE_NAME, LinkPolicy, Preconditions, RunConfig, RunReport, Session,
    StatusReport,
};
use dtar_scan::Scanner;

#[derive(Parser)]
#[command(
    name = "dtar",
    version,
    about = "Differential directory archiver",
    long_about = "dtar archives only what changed in a directory since the previous run.\n\n\
                  Each run compares the tree against the catalog saved by the last run, \
                  writes the changed and added files to a tar archive, and writes a script \
                  that deletes what was removed."
)]
struct Cli {
    /// Directory to archive (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    #[command(flatten)]
    archive: ArchiveArgs,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Clone)]
struct ArchiveArgs {
    /// Archive base name
    #[arg(short = 'n', long = "name", default_value = DEFAULT_ARCHIVE_NAME)]
    name: String,

    /// Split the archive into volumes of at most this size (e.g., "700MB", "4.7GB")
    #[arg(short, long)]
    size: Option<String>,

    /// Compress volumes with gzip
    #[arg(short, long)]
    compress: bool,

    /// Directory for the archive and removal script (defaults to PATH)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Exclude paths matching this glob, relative to PATH (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Hashing threads (0 = one per core)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Refuse to archive a tree whose links escape it or dangle
    #[arg(long)]
    strict_links: bool,

    /// Do not require running as root
    #[arg(long)]
    no_root_check: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Archive what changed since the last run
    Archive {
        /// Directory to archive
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        args: ArchiveArgs,
    },

    /// Show what the next run would archive and remove
    Status {
        /// Directory to compare
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Scan and print a fresh catalog as JSON, without saving it
    Catalog {
        /// Directory to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the stored catalog and its links
    Check {
        /// Directory holding the catalog
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match cli.command {
        Some(Command::Archive { path, args }) => run_archive(&path, &args),
        Some(Command::Status { path, format }) => run_status(&path, format),
        Some(Command::Catalog { path, output }) => run_catalog(&path, output),
        Some(Command::Check { path, format }) => run_check(&path, format),
        None => run_archive(&cli.path, &cli.archive),
    }
}

/// The only place process state is read; everything below gets it passed in.
fn preconditions() -> Preconditions {
    Preconditions::new(cfg!(unix), uzers::get_effective_uid())
}

fn run_config(path: &Path, args: &ArchiveArgs) -> Result<RunConfig> {
    let mut builder = RunConfig::builder();
    builder
        .root(path)
        .archive_name(args.name.clone())
        .compression(if args.compress {
            Compression::Gzip
        } else {
            Compression::None
        })
        .link_policy(if args.strict_links {
            LinkPolicy::Strict
        } else {
            LinkPolicy::Warn
        })
        .require_privilege(!args.no_root_check)
        .exclude(args.exclude.clone())
        .threads(args.threads);

    if let Some(size) = &args.size {
        builder.chunk_size(parse_size(size).wrap_err_with(|| format!("Invalid size '{size}'"))?);
    }
    if let Some(dir) = &args.output_dir {
        builder.output_dir(dir.clone());
    }

    builder.build().wrap_err("Invalid options")
}

/// Archive what changed since the last run.
fn run_archive(path: &Path, args: &ArchiveArgs) -> Result<()> {
    let config = run_config(path, args)?;

    eprintln!("Archiving changes in {}...", path.display());

    let report = Session::new(config)
        .run(&preconditions())
        .wrap_err("Archive run failed")?;

    print_run_report(&report);
    Ok(())
}

fn print_run_report(report: &RunReport) {
    let summary = &report.summary;

    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", report.root.display());
    if report.bootstrap {
        println!(" No usable previous catalog: everything counts as added");
    }
    println!(
        " {} changed, {} added, {} removed, {} unchanged",
        summary.changed, summary.added, summary.removed, summary.unchanged
    );
    println!("{}", "─".repeat(60));

    let volumes = report
        .volumes
        .iter()
        .map(|v| format!("'{}'", v.display()))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "Packed {} files for a total of {} in {}",
        report.entries_written,
        format_size(report.bytes_written),
        volumes
    );

    if let Some(script) = &report.script {
        println!("Removal script: {}", script.display());
    }
    if report.skipped > 0 {
        println!(
            "{} entries changed while archiving; the archive is not a consistent snapshot",
            report.skipped
        );
    }
    if !report.warnings.is_empty() {
        println!("{} warning(s)", report.warnings.len());
    }
}

/// Show the pending diff.
fn run_status(path: &Path, format: OutputFormat) -> Result<()> {
    let mut config = RunConfig::new(path);
    config.require_privilege = false;

    let status = Session::new(config).status().wrap_err("Status failed")?;

    match format {
        OutputFormat::Text => print_status(&status),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
    }
    Ok(())
}

fn print_status(status: &StatusReport) {
    let diff = &status.diff;
    let summary = diff.summary();

    println!();
    println!("{}", "─".repeat(60));
    println!(" {}", diff.root.display());
    println!(
        " {} changed, {} added, {} removed, {} unchanged",
        summary.changed, summary.added, summary.removed, summary.unchanged
    );
    println!(" {} to archive", format_size(summary.bytes_to_archive));
    println!("{}", "─".repeat(60));

    for path in diff.changed.keys() {
        println!(" M {path}");
    }
    for path in diff.added.keys() {
        println!(" A {path}");
    }
    for entry in &diff.removed {
        println!(" D {}", entry.path);
    }

    for warning in &status.warnings {
        println!(" warning: {warning}");
    }
}

/// Print a fresh catalog without saving it.
fn run_catalog(path: &Path, output: Option<PathBuf>) -> Result<()> {
    let root = path.canonicalize().context("Invalid path")?;

    eprintln!("Scanning {}...", root.display());

    let scan_config = RunConfig::new(&root).scan_config(&root);
    let outcome = Scanner::new().scan(&scan_config).context("Scan failed")?;
    let json = serde_json::to_string_pretty(&outcome.catalog)?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    if !outcome.warnings.is_empty() {
        eprintln!("{} warning(s) during scan", outcome.warnings.len());
    }
    Ok(())
}

/// Validate the stored catalog.
fn run_check(path: &Path, format: OutputFormat) -> Result<()> {
    let root = path.canonicalize().context("Invalid path")?;
    let store = CatalogStore::in_root(&root, DEFAULT_CATALOG_NAME);

    let catalog = match store.load() {
        LoadOutcome::Missing => {
            println!("No catalog at {}; the next run archives everything", store.path().display());
            return Ok(());
        }
        LoadOutcome::Corrupt { reason } => {
            bail!("Corrupt catalog {}: {reason}", store.path().display());
        }
        LoadOutcome::Loaded(catalog) => catalog,
    };

    let report = check_links(&catalog);
    match format {
        OutputFormat::Text => {
            let stats = catalog.stats();
            println!();
            println!("{}", "─".repeat(60));
            println!(" {}", store.path().display());
            println!(
                " {} files, {} hard links, {} symlinks, {} directories",
                stats.files, stats.hard_links, stats.symlinks, stats.dirs
            );
            println!(" {} in files, max depth {}", format_size(stats.total_size), stats.max_depth);
            println!("{}", "─".repeat(60));
            for issue in &report.issues {
                println!(" {:?}: {} -> {}", issue.kind, issue.key, issue.target);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
    }

    if !report.is_safe() {
        bail!("{} unsafe link(s) in {}", report.issues.len(), store.path().display());
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Parse a size string (e.g., "1KB", "3.14MB", "5GB").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let number = |s: &str| -> Result<f64> {
        Ok(s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.').parse()?)
    };

    let (num, multiplier) = if s.ends_with("TB") || s.ends_with('T') {
        (number(&s)?, 1u64 << 40)
    } else if s.ends_with("GB") || s.ends_with('G') {
        (number(&s)?, 1 << 30)
    } else if s.ends_with("MB") || s.ends_with('M') {
        (number(&s)?, 1 << 20)
    } else if s.ends_with("KB") || s.ends_with('K') {
        (number(&s)?, 1 << 10)
    } else if s.ends_with('B') {
        (number(&s)?, 1)
    } else {
        (s.parse::<f64>()?, 1)
    };

    if !num.is_finite() || num <= 0.0 {
        bail!("Size must be positive");
    }
    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1k").unwrap(), 1024);
        assert_eq!(parse_size("5GB").unwrap(), 5 * (1 << 30));
        assert_eq!(parse_size("3.5MB").unwrap(), 3 * (1 << 20) + (1 << 19));
        assert_eq!(parse_size(" 2T ").unwrap(), 2 << 40);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("0").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["dtar", "archive", "/srv", "-n", "weekly", "-s", "700MB", "-c"]).unwrap();
        let Some(Command::Archive { path, args }) = cli.command else {
            panic!("expected archive command");
        };
        assert_eq!(path, PathBuf::from("/srv"));
        let config = run_config(&path, &args).unwrap();
        assert_eq!(config.archive_name, "weekly");
        assert_eq!(config.chunk_size, Some(700 << 20));
        assert_eq!(config.compression, Compression::Gzip);
        assert!(config.require_privilege);
    }

    #[test]
    fn test_default_command_archives_path() {
        let cli = Cli::try_parse_from(["dtar", "/data", "--no-root-check"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.path, PathBuf::from("/data"));
        assert!(cli.archive.no_root_check);
    }
}
