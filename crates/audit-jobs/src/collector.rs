//! Job collection.
//!
//! Turns the warehouse listing for the audit window into a [`Report`]:
//! non-query jobs are dropped, each query job is normalized into a
//! [`JobRecord`], and the aggregate is computed once at the end.
//!
//! The aggregate's `job_count` comes from a separate pre-count of the whole
//! window (all job kinds), while bytes and cost cover only collected jobs.
//! The job set can change between the count and the listing; the two are
//! not reconciled.

use chrono::{DateTime, Months, Utc};
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::models::{Aggregate, JobRecord, Report};
use crate::pricing::{self, CostEstimator};
use crate::warehouse::JobSource;

/// Start of the trailing window: `months` calendar months before `now`.
pub fn window_start(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Collects one run's worth of job records from a [`JobSource`].
pub struct JobCollector<'a, S: JobSource + ?Sized> {
    source: &'a mut S,
    estimator: CostEstimator,
}

impl<'a, S: JobSource + ?Sized> JobCollector<'a, S> {
    pub fn new(source: &'a mut S, estimator: CostEstimator) -> Self {
        Self { source, estimator }
    }

    /// Collect every query job created at or after `window_start`.
    ///
    /// Listing failures propagate; nothing partial is returned.
    pub fn collect(&mut self, window_start: DateTime<Utc>) -> Result<Report> {
        let job_count = self.source.count_jobs(window_start)?;
        info!(job_count, since = %window_start, "Number of jobs in window");

        let listed = self.source.list_jobs(window_start)?;

        let mut jobs = Vec::new();
        let mut skipped = 0usize;
        let mut total_bytes: i64 = 0;

        for job in listed {
            let Some(job) = job else {
                trace!("skipping empty listing entry");
                continue;
            };
            if !job.kind.is_audited() {
                trace!(job_id = %job.job_id, kind = ?job.kind, "skipping non-query job");
                skipped += 1;
                continue;
            }

            let record = JobRecord::new(job, &self.estimator);
            total_bytes = total_bytes.saturating_add(record.total_bytes());
            debug!(
                job_id = %record.job_id,
                bytes = record.total_bytes(),
                cost = record.cost(),
                "collected job"
            );
            jobs.push(record);
        }

        let summary = (!jobs.is_empty()).then(|| Aggregate {
            megabytes: pricing::megabytes(total_bytes),
            job_count,
            cost: self.estimator.estimate(Some(total_bytes)),
        });

        info!(collected = jobs.len(), skipped, "Job collection finished");
        Ok(Report { jobs, summary })
    }
}
