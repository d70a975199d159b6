//! One audit pass: collect → persist → snapshot → summary.
//!
//! The warehouse source and the audit store arrive wrapped in [`Scoped`]
//! guards owned by the runner, so both are closed exactly once when the run
//! ends, whether it succeeds or fails at any step.

use std::path::PathBuf;
use std::time::Instant;

use audit_core::AuditConfig;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::bigquery::{BigQueryClient, BigQueryConfig};
use crate::collector::{JobCollector, window_start};
use crate::db::{AuditStore, AuditWriter, SqliteAuditStore};
use crate::error::Result;
use crate::models::Aggregate;
use crate::pricing::CostEstimator;
use crate::scope::Scoped;
use crate::snapshot::SnapshotWriter;
use crate::warehouse::JobSource;

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Earliest job creation time collected
    pub window_start: DateTime<Utc>,
    pub estimator: CostEstimator,
    pub snapshot: SnapshotWriter,
    /// Reference point for the reported wall-clock time
    pub started: Instant,
}

impl RunOptions {
    pub fn from_config(config: &AuditConfig, now: DateTime<Utc>) -> Self {
        Self {
            window_start: window_start(now, config.window_months),
            estimator: CostEstimator::new(config.price_per_tib),
            snapshot: SnapshotWriter::new(&config.snapshot_dir),
            started: Instant::now(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Records collected and stored
    pub collected: usize,
    /// Aggregate, absent when nothing was collected
    pub aggregate: Option<Aggregate>,
    pub snapshot_path: PathBuf,
    pub elapsed_secs: u64,
}

impl RunSummary {
    /// True when the run found no eligible job.
    pub fn is_empty(&self) -> bool {
        self.aggregate.is_none()
    }

    /// Console completion line.
    pub fn message(&self) -> String {
        match &self.aggregate {
            Some(aggregate) => format!(
                "Statistics uploaded. {aggregate} \nTotal time = {}s",
                self.elapsed_secs
            ),
            None => "Statistics were not processed".to_string(),
        }
    }
}

/// Runs the pipeline over a job source and an audit store.
pub struct PipelineRunner<J: JobSource, A: AuditStore> {
    source: Scoped<J>,
    store: Scoped<A>,
    options: RunOptions,
}

impl<J: JobSource, A: AuditStore> PipelineRunner<J, A> {
    pub fn new(source: Scoped<J>, store: Scoped<A>, options: RunOptions) -> Self {
        Self {
            source,
            store,
            options,
        }
    }

    /// Run one pass. Both connections are released when this returns.
    #[instrument(skip(self), fields(since = %self.options.window_start))]
    pub fn run(mut self) -> Result<RunSummary> {
        info!("Start gathering");
        let report = JobCollector::new(&mut *self.source, self.options.estimator)
            .collect(self.options.window_start)?;

        let mut writer = AuditWriter::new(&mut *self.store);
        for record in &report.jobs {
            writer.insert(record)?;
        }
        info!(rows = report.jobs.len(), "Audit rows stored");

        let serialized = report.to_json()?;
        let snapshot_path = self.options.snapshot.save(&serialized)?;

        let summary = RunSummary {
            collected: report.jobs.len(),
            aggregate: report.summary,
            snapshot_path,
            elapsed_secs: self.options.started.elapsed().as_secs_f64().round() as u64,
        };

        match &summary.aggregate {
            Some(aggregate) => info!(
                megabytes = aggregate.megabytes,
                job_count = aggregate.job_count,
                cost = aggregate.cost,
                elapsed_secs = summary.elapsed_secs,
                "Statistics uploaded"
            ),
            None => info!("No eligible jobs in window"),
        }

        Ok(summary)
    }
}

/// Connect to BigQuery and the SQLite audit store from `config` and run.
pub fn run_with_config(config: &AuditConfig) -> Result<RunSummary> {
    let options = RunOptions::from_config(config, Utc::now());

    let source = Scoped::new(
        "warehouse",
        BigQueryClient::connect(BigQueryConfig::from_audit_config(config))?,
    );
    let store = Scoped::new(
        "audit store",
        SqliteAuditStore::open(&config.audit_db_path, config.max_query_len)?,
    );

    PipelineRunner::new(source, store, options).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_message_with_aggregate() {
        let summary = RunSummary {
            collected: 2,
            aggregate: Some(Aggregate {
                megabytes: 1_048_576,
                job_count: 2,
                cost: 5,
            }),
            snapshot_path: PathBuf::from("gbq_report_20261018.json"),
            elapsed_secs: 3,
        };
        assert!(!summary.is_empty());
        assert_eq!(
            summary.message(),
            "Statistics uploaded. {mem: 1048576, len: 2, prc: 5} \nTotal time = 3s"
        );
    }

    #[test]
    fn test_summary_message_when_empty() {
        let summary = RunSummary {
            collected: 0,
            aggregate: None,
            snapshot_path: PathBuf::from("gbq_report_20261018.json"),
            elapsed_secs: 0,
        };
        assert!(summary.is_empty());
        assert_eq!(summary.message(), "Statistics were not processed");
    }

    #[test]
    fn test_options_from_config() {
        let config = AuditConfig {
            window_months: 2,
            price_per_tib: 7,
            snapshot_dir: PathBuf::from("/tmp/reports"),
            ..AuditConfig::default()
        };
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 10, 18, 0, 0, 0).unwrap();
        let options = RunOptions::from_config(&config, now);

        assert_eq!(
            options.window_start,
            chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 8, 18, 0, 0, 0).unwrap()
        );
        assert_eq!(options.estimator.price_per_tib(), 7);
        assert_eq!(options.snapshot.dir(), std::path::Path::new("/tmp/reports"));
    }
}
