//! Data models for the audit run.
//!
//! Serialized field names are the short keys of the snapshot file
//! (`jid`, `prj`, `crt`, ...), which downstream report consumers read.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::lineage;
use crate::pricing::CostEstimator;

/// Warehouse job type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Query,
    Load,
    Copy,
    Extract,
    Unknown,
}

impl JobKind {
    /// Map a BigQuery `configuration.jobType` value.
    pub fn from_api(job_type: &str) -> Self {
        match job_type.to_ascii_uppercase().as_str() {
            "QUERY" => JobKind::Query,
            "LOAD" => JobKind::Load,
            "COPY" => JobKind::Copy,
            "EXTRACT" => JobKind::Extract,
            _ => JobKind::Unknown,
        }
    }

    /// Only interactive/query jobs are audited.
    pub fn is_audited(self) -> bool {
        matches!(self, JobKind::Query)
    }
}

/// Structured job failure as reported by the warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub message: Option<String>,
    pub location: Option<String>,
    pub reason: Option<String>,
}

/// A job as listed by the warehouse service, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseJob {
    pub job_id: String,
    pub project: String,
    pub kind: JobKind,
    pub billing_tier: Option<i64>,
    pub created: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub estimated_bytes: Option<i64>,
    pub total_bytes: Option<i64>,
    pub user_email: Option<String>,
    pub query: Option<String>,
    pub dml_affected_rows: Option<i64>,
    pub error: Option<ErrorDetail>,
}

impl WarehouseJob {
    /// Minimal query job, mostly useful for tests and fixtures.
    pub fn query(job_id: impl Into<String>, project: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            project: project.into(),
            kind: JobKind::Query,
            billing_tier: None,
            created,
            ended: Some(created),
            dry_run: false,
            estimated_bytes: None,
            total_bytes: None,
            user_email: None,
            query: None,
            dml_affected_rows: None,
            error: None,
        }
    }

    /// Set the job kind.
    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the completion time.
    pub fn with_ended(mut self, ended: DateTime<Utc>) -> Self {
        self.ended = Some(ended);
        self
    }

    /// Set the bytes processed.
    pub fn with_bytes(mut self, estimated: Option<i64>, total: Option<i64>) -> Self {
        self.estimated_bytes = estimated;
        self.total_bytes = total;
        self
    }

    /// Set the SQL text.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the submitting user.
    pub fn with_user(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    /// Set the error detail.
    pub fn with_error(mut self, error: ErrorDetail) -> Self {
        self.error = Some(error);
        self
    }
}

/// Objects a query wrote to or read from, one slot per governing verb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedObjects {
    #[serde(rename = "ins")]
    pub inserted: Option<String>,
    #[serde(rename = "sel")]
    pub selected: Option<String>,
    #[serde(rename = "upd")]
    pub updated: Option<String>,
    #[serde(rename = "del")]
    pub deleted: Option<String>,
}

impl AffectedObjects {
    /// True when no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_none()
            && self.selected.is_none()
            && self.updated.is_none()
            && self.deleted.is_none()
    }
}

/// One normalized query job.
///
/// Duration and cost are derived in [`JobRecord::new`] and cannot be set
/// independently of their inputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    #[serde(rename = "jid")]
    pub job_id: String,
    #[serde(rename = "prj")]
    pub project: String,
    #[serde(rename = "bil")]
    pub billing_tier: Option<i64>,
    #[serde(rename = "crt", serialize_with = "snapshot_time::serialize")]
    pub created: DateTime<Utc>,
    #[serde(rename = "end", serialize_with = "snapshot_time::serialize_option")]
    pub ended: Option<DateTime<Utc>>,
    #[serde(rename = "dur")]
    duration_secs: i64,
    #[serde(rename = "dry")]
    pub dry_run: bool,
    #[serde(rename = "est")]
    pub estimated_bytes: i64,
    #[serde(rename = "mem")]
    total_bytes: i64,
    #[serde(rename = "prc")]
    cost: i64,
    #[serde(rename = "eml")]
    pub user_email: Option<String>,
    #[serde(rename = "sql")]
    pub query: Option<String>,
    #[serde(rename = "aff")]
    pub dml_affected_rows: Option<i64>,
    #[serde(rename = "obj")]
    pub affected: AffectedObjects,
    #[serde(rename = "err")]
    pub error: Option<ErrorDetail>,
}

impl JobRecord {
    /// Normalize a listed job: default byte counts, derive duration, cost
    /// and lineage.
    pub fn new(job: WarehouseJob, estimator: &CostEstimator) -> Self {
        let duration_secs = job
            .ended
            .map(|ended| {
                let millis = (ended - job.created).num_milliseconds();
                (millis as f64 / 1000.0).round_ties_even() as i64
            })
            .unwrap_or(0)
            .max(0);

        let affected = job
            .query
            .as_deref()
            .map(lineage::extract)
            .unwrap_or_default();

        Self {
            cost: estimator.estimate(job.total_bytes),
            total_bytes: job.total_bytes.unwrap_or(0),
            estimated_bytes: job.estimated_bytes.unwrap_or(0),
            duration_secs,
            affected,
            job_id: job.job_id,
            project: job.project,
            billing_tier: job.billing_tier,
            created: job.created,
            ended: job.ended,
            dry_run: job.dry_run,
            user_email: job.user_email,
            query: job.query,
            dml_affected_rows: job.dml_affected_rows,
            error: job.error,
        }
    }

    /// Whole seconds between creation and completion.
    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
    }

    /// Total bytes processed (0 when the warehouse did not report it).
    pub fn total_bytes(&self) -> i64 {
        self.total_bytes
    }

    /// Estimated cost of this job.
    pub fn cost(&self) -> i64 {
        self.cost
    }
}

/// Totals over one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Aggregate {
    /// Megabytes processed across collected jobs
    #[serde(rename = "mem")]
    pub megabytes: i64,

    /// Jobs in the enumeration window (from the pre-count)
    #[serde(rename = "len")]
    pub job_count: usize,

    /// Estimated cost across collected jobs
    #[serde(rename = "prc")]
    pub cost: i64,
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{mem: {}, len: {}, prc: {}}}",
            self.megabytes, self.job_count, self.cost
        )
    }
}

/// Everything collected in one run.
///
/// Serializes as a JSON object keyed `indx_<n>` per record, in collection
/// order, plus `summary` when an aggregate exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub jobs: Vec<JobRecord>,
    pub summary: Option<Aggregate>,
}

impl Report {
    /// True when no job was collected.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Serialize to the snapshot format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Report {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.jobs.len() + usize::from(self.summary.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (index, job) in self.jobs.iter().enumerate() {
            map.serialize_entry(&format!("indx_{index}"), job)?;
        }
        if let Some(summary) = &self.summary {
            map.serialize_entry("summary", summary)?;
        }
        map.end()
    }
}

/// `YYYY-MM-DD HH:MM:SS` timestamps for the snapshot file.
pub mod snapshot_time {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    /// Format used for every timestamp in the snapshot.
    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn serialize_option<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }
}
