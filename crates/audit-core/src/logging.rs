//! Logging infrastructure for gbq-audit.
//!
//! Structured logging on top of the `tracing` ecosystem:
//!
//! - JSON lines written to a daily rolling `gbq-audit.log` file
//! - Compact human-readable output on stderr
//! - `RUST_LOG` overrides the default filter
//!
//! ## Example
//!
//! ```no_run
//! use audit_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("audit run started");
//! tracing::debug!(job_id = "bquxjob_1a2b", "collected job");
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::install_dir;
use crate::error::{AuditError, Result};

/// File name of the rolling log file.
pub const LOG_FILE_NAME: &str = "gbq-audit.log";

/// Crates whose events pass the default filter.
const LOG_TARGETS: &[&str] = &["gbq_audit", "audit_jobs", "audit_core"];

/// Keeps the file writer alive; dropping it flushes buffered lines.
pub struct LogGuard {
    _file_guard: WorkerGuard,
    log_dir: PathBuf,
}

impl LogGuard {
    /// Directory the rolling log file is written to.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Initialize the logging system.
///
/// * `log_dir` - Optional custom log directory. Defaults to `<install-dir>/logs/`
/// * `verbose` - DEBUG for our crates instead of INFO, plus source locations
///   on the console.
///
/// Hold the returned [`LogGuard`] until the process exits.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = log_dir.map_or_else(default_log_dir, Ok)?;
    std::fs::create_dir_all(&log_dir).map_err(|e| AuditError::DirectoryCreation {
        path: log_dir.clone(),
        source: e,
    })?;

    // One JSON file per day; the audit runs once a day so each run gets its own.
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME));

    // RUST_LOG wins over the verbosity flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: file_guard,
        log_dir,
    })
}

/// Filter used when `RUST_LOG` is unset: our crates only, at INFO or DEBUG.
pub fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    let directives: Vec<String> = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Initialize minimal console-only logging for tests.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Default log directory: `<install-dir>/logs/`.
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(install_dir()?.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_is_under_install_dir() {
        let dir = default_log_dir().unwrap();
        assert!(dir.ends_with("logs"));
        assert_eq!(dir.parent().unwrap(), install_dir().unwrap());
    }

    #[test]
    fn test_default_filter_levels() {
        let quiet = default_filter(false).to_string();
        for target in LOG_TARGETS {
            assert!(quiet.contains(&format!("{target}=info")), "{quiet}");
        }
        assert!(default_filter(true).to_string().contains("audit_jobs=debug"));
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        init_test_logging();
    }
}
