//! Dated JSON snapshot of a run.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::info;

use crate::error::Result;

/// Writes `gbq_report_<YYYYMMDD>.json` into a directory.
///
/// One file per calendar day; a rerun on the same day overwrites it.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Snapshot path for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("gbq_report_{}.json", date.format("%Y%m%d")))
    }

    /// Write `serialized` verbatim to today's (local date) snapshot.
    pub fn save(&self, serialized: &str) -> Result<PathBuf> {
        self.save_for_date(Local::now().date_naive(), serialized)
    }

    /// Write `serialized` verbatim to the snapshot for `date`.
    pub fn save_for_date(&self, date: NaiveDate, serialized: &str) -> Result<PathBuf> {
        let path = self.path_for(date);
        info!(path = %path.display(), "Start report save action");
        std::fs::write(&path, serialized)?;
        info!(path = %path.display(), bytes = serialized.len(), "End report save action");
        Ok(path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_path_embeds_date() {
        let writer = SnapshotWriter::new("/var/lib/gbq-audit");
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            writer.path_for(date),
            PathBuf::from("/var/lib/gbq-audit/gbq_report_20261018.json")
        );
    }

    #[test]
    fn test_same_day_overwrites() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        writer.save_for_date(date, r#"{"first":true}"#).unwrap();
        let path = writer.save_for_date(date, "{}").unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "{}");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path().join("missing"));
        assert!(writer.save("{}").is_err());
    }
}
