//! # audit-jobs
//!
//! Collection, lineage, pricing and persistence for the BigQuery usage audit.
//!
//! This crate provides:
//! - [`JobCollector`] - Build normalized job records for the audit window
//! - [`lineage`] - Best-effort affected-object scan over raw SQL
//! - [`CostEstimator`] - Linear per-TiB price model
//! - [`AuditWriter`] - Audit table inserts with a degraded retry
//! - [`SnapshotWriter`] - Dated JSON report file
//! - [`PipelineRunner`] - One full pass with guaranteed connection release
//!
//! ## Example
//!
//! ```no_run
//! use audit_core::AuditConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AuditConfig::load(None)?;
//!     config.export_credentials()?;
//!
//!     let summary = audit_jobs::run_with_config(&config)?;
//!     println!("{}", summary.message());
//!     Ok(())
//! }
//! ```

pub mod bigquery;
pub mod collector;
pub mod db;
pub mod error;
pub mod lineage;
pub mod models;
pub mod pricing;
pub mod runner;
pub mod scope;
pub mod snapshot;
pub mod warehouse;

// Re-export main types
pub use bigquery::{BigQueryClient, BigQueryConfig};
pub use collector::JobCollector;
pub use db::{AuditRow, AuditStore, AuditWriter, SqliteAuditStore};
pub use error::{CostError, Result};
pub use models::{AffectedObjects, Aggregate, ErrorDetail, JobKind, JobRecord, Report, WarehouseJob};
pub use pricing::CostEstimator;
pub use runner::{PipelineRunner, RunOptions, RunSummary, run_with_config};
pub use scope::{Closeable, Scoped};
pub use snapshot::SnapshotWriter;
pub use warehouse::JobSource;
