//! Logging setup for sparsevo binaries, examples and tests.
//!
//! Solver progress is emitted as structured events (`iteration`, `lambda`,
//! `rmse`, …) rather than preformatted strings, so the subscriber installed
//! here favors compact single-line output with neither timestamps nor
//! module targets: per-iteration logs stay grep-able and diff-able between
//! runs. Crates embedding sparsevo are kept at WARN unless the filter says
//! otherwise.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the default subscriber: sparsevo events at INFO, everything
/// else at WARN. A `RUST_LOG` environment filter, when present, replaces
/// the default filter entirely.
///
/// Repeated initialization (e.g. from several test binaries sharing a
/// process) is silently ignored.
///
/// # Example
/// ```no_run
/// sparsevo::init_logger();
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Same as [`init_logger`] with a custom default level for this crate's
/// events.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,sparsevo={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .without_time()
        .with_target(false)
        .try_init()
        .ok();
}
