//! gbq-audit - BigQuery usage audit
//!
//! Collects the last month of BigQuery query jobs, prices them, stores one
//! audit row per job and writes a dated JSON snapshot.
//!
//! ## Usage
//!
//! ```bash
//! # One audit pass with gbq-audit.yaml next to the executable (if present)
//! gbq-audit
//!
//! # Explicit configuration file, debug logging
//! gbq-audit --config /etc/gbq-audit.yaml -v
//!
//! # With custom log directory
//! gbq-audit --log-dir /var/log/gbq-audit/
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use audit_core::{AuditConfig, AuditError, LogGuard, init_logging};
use audit_jobs::CostError;
use clap::Parser;
use tracing::{error, info};

/// BigQuery billing and usage audit
///
/// Gathers recent query jobs, estimates their on-demand cost and records
/// them in the audit database and a daily JSON report.
#[derive(Parser, Debug)]
#[command(name = "gbq-audit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to gbq-audit.yaml next to the executable)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for log files (defaults to logs/ next to the executable)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Credentials go into the environment before logging starts its writer thread.
    let config = match prepare(&cli) {
        Ok(config) => config,
        Err(e) => {
            report_failure(&e);
            return ExitCode::from(1);
        }
    };

    let guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    info!(log_dir = %guard.log_dir().display(), "Starting gbq-audit");

    match audit_jobs::run_with_config(&config).context("audit run failed") {
        Ok(summary) => {
            println!("{}", summary.message());
            info!(collected = summary.collected, "gbq-audit finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("gbq-audit failed: {:#}", e);
            report_failure(&e);
            ExitCode::from(1)
        }
    }
}

fn setup_logging(cli: &Cli) -> audit_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

/// Load configuration and export warehouse credentials.
///
/// Runs while the process is still single-threaded.
fn prepare(cli: &Cli) -> anyhow::Result<AuditConfig> {
    let config = AuditConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config
        .export_credentials()
        .context("exporting warehouse credentials")?;
    Ok(config)
}

fn report_failure(err: &anyhow::Error) {
    eprintln!("Error: {:#}", err);
    if let Some(hint) = hint_for(err) {
        eprintln!("{}", hint);
    }
}

/// Actionable follow-up for known failure kinds.
fn hint_for(err: &anyhow::Error) -> Option<String> {
    if let Some(e) = err.downcast_ref::<AuditError>() {
        return e.guidance().map(str::to_string);
    }
    err.downcast_ref::<CostError>().map(CostError::friendly_message)
}
