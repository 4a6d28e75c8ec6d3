use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding a tracing filter directive.
const FILTER_VAR: &str = "DTAR_LOG";

/// Install the global subscriber, logging to stderr so stdout stays usable
/// for JSON output.
///
/// `-v`/`-q` win over `DTAR_LOG`, which wins over the `info` default.
pub fn init(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Some("warn"),
        (false, 0) => None,
        (false, 1) => Some("debug"),
        (false, _) => Some("trace"),
    };

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => env::var(FILTER_VAR)
            .ok()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new("info")),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .init();
}
