//! Warehouse job-listing seam.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::WarehouseJob;
use crate::scope::Closeable;

/// Source of job metadata for the audit window.
pub trait JobSource: Closeable {
    /// Number of jobs, of any kind and any user, created at or after `since`.
    fn count_jobs(&mut self, since: DateTime<Utc>) -> Result<usize>;

    /// Jobs of all users created at or after `since`, in listing order.
    ///
    /// `None` marks an entry the source could not interpret; callers skip it.
    fn list_jobs(&mut self, since: DateTime<Utc>) -> Result<Vec<Option<WarehouseJob>>>;
}
