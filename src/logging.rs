//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! Two modes:
//! - **Production** ([`init_production`]): operational JSON file, audit JSON
//!   file, and a console layer
//! - **CLI** ([`init_cli`]): console-only for one-shot subcommands
//!
//! Execution events are emitted under [`AUDIT_TARGET`]. They are kept out of
//! the operational log and are never dropped by `RUST_LOG`: an operator
//! turning logging down to `warn` still gets a complete audit trail.
//!
//! Console output goes to stderr so that subcommands printing JSON results
//! on stdout stay machine-readable.

use std::path::Path;

use tracing::{Level, Metadata};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{filter_fn, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// `tracing` target every execution event is published under.
pub const AUDIT_TARGET: &str = "leadgate::audit";

/// Operational log file prefix inside the logs directory.
pub const LOG_FILE_PREFIX: &str = "leadgate.log";

/// Audit log file prefix inside the logs directory.
pub const AUDIT_FILE_PREFIX: &str = "leadgate-audit.log";

/// Holds the non-blocking writer guards for file logging.
///
/// The guards must be kept alive for the duration of the process. Dropping
/// them flushes pending entries and closes both files.
pub struct LoggingGuard {
    _operational: WorkerGuard,
    _audit: WorkerGuard,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard").finish_non_exhaustive()
    }
}

/// `RUST_LOG`, falling back to `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Filter admitting only execution events.
pub fn audit_filter() -> Targets {
    Targets::new().with_target(AUDIT_TARGET, Level::INFO)
}

/// Whether a record belongs to the audit trail.
pub fn is_audit_record(metadata: &Metadata<'_>) -> bool {
    metadata.target() == AUDIT_TARGET
}

/// Initialise logging for the long-running `sweeper` subcommand.
///
/// Operational logs go to `{logs_dir}/leadgate.log.YYYY-MM-DD` and execution
/// events to `{logs_dir}/leadgate-audit.log.YYYY-MM-DD`, both JSON with daily
/// rotation. Human-readable output on stderr follows `RUST_LOG`
/// (default: `info`).
///
/// Returns a [`LoggingGuard`] that must be kept alive for log flushing.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (operational_writer, operational_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX),
    );
    let (audit_writer, audit_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(logs_dir, AUDIT_FILE_PREFIX),
    );

    let operational_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(operational_writer)
        .with_filter(filter_fn(|metadata| !is_audit_record(metadata)))
        .with_filter(env_filter());

    let audit_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(audit_writer)
        .with_filter(audit_filter());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(operational_layer)
        .with(audit_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard {
        _operational: operational_guard,
        _audit: audit_guard,
    })
}

/// Initialise minimal logging for one-shot subcommands.
///
/// Emits human-readable output to stderr only. No file rotation.
/// Controlled by `RUST_LOG` (default: `info`); execution events are shown
/// at `info` whatever the filter says.
pub fn init_cli() {
    let filter = match format!("{AUDIT_TARGET}=info").parse() {
        Ok(directive) => env_filter().add_directive(directive),
        Err(_) => env_filter(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
