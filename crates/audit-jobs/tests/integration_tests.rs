//! End-to-end runs over an in-memory job source, a SQLite audit store and a
//! temporary snapshot directory.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use audit_jobs::db::DEFAULT_MAX_QUERY_LEN;
use audit_jobs::{
    AuditRow, AuditStore, Closeable, CostError, CostEstimator, JobKind, JobSource,
    PipelineRunner, RunOptions, Scoped, SnapshotWriter, SqliteAuditStore, WarehouseJob,
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tempfile::{TempDir, tempdir};

const TIB: i64 = 1 << 40;

/// Job source serving a fixed listing and counting closes.
struct MockSource {
    count: usize,
    jobs: Vec<Option<WarehouseJob>>,
    fail: bool,
    closes: Rc<Cell<u32>>,
}

impl JobSource for MockSource {
    fn count_jobs(&mut self, _since: DateTime<Utc>) -> audit_jobs::Result<usize> {
        Ok(self.count)
    }

    fn list_jobs(&mut self, _since: DateTime<Utc>) -> audit_jobs::Result<Vec<Option<WarehouseJob>>> {
        if self.fail {
            return Err(CostError::WarehouseApi {
                status: 500,
                message: "internal error".into(),
            });
        }
        Ok(self.jobs.clone())
    }
}

impl Closeable for MockSource {
    fn close(&mut self) {
        self.closes.set(self.closes.get() + 1);
    }
}

/// SQLite store that also counts closes and commits.
struct CountingStore {
    inner: SqliteAuditStore,
    closes: Rc<Cell<u32>>,
    commits: Rc<Cell<u32>>,
}

impl AuditStore for CountingStore {
    fn insert_row(&mut self, row: &AuditRow) -> audit_jobs::Result<()> {
        self.inner.insert_row(row)
    }

    fn commit(&mut self) -> audit_jobs::Result<()> {
        self.commits.set(self.commits.get() + 1);
        self.inner.commit()
    }
}

impl Closeable for CountingStore {
    fn close(&mut self) {
        self.closes.set(self.closes.get() + 1);
        self.inner.close();
    }
}

struct Harness {
    dir: TempDir,
    source_closes: Rc<Cell<u32>>,
    store_closes: Rc<Cell<u32>>,
    commits: Rc<Cell<u32>>,
}

impl Harness {
    fn new() -> Self {
        audit_core::logging::init_test_logging();
        Self {
            dir: tempdir().unwrap(),
            source_closes: Rc::new(Cell::new(0)),
            store_closes: Rc::new(Cell::new(0)),
            commits: Rc::new(Cell::new(0)),
        }
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("gbq_audit.db")
    }

    fn snapshot_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("reports")
    }

    fn runner(
        &self,
        count: usize,
        jobs: Vec<Option<WarehouseJob>>,
        fail: bool,
        max_query_len: usize,
    ) -> PipelineRunner<MockSource, CountingStore> {
        std::fs::create_dir_all(self.snapshot_dir()).unwrap();
        let source = MockSource {
            count,
            jobs,
            fail,
            closes: self.source_closes.clone(),
        };
        let store = CountingStore {
            inner: SqliteAuditStore::open(self.db_path(), max_query_len).unwrap(),
            closes: self.store_closes.clone(),
            commits: self.commits.clone(),
        };
        let options = RunOptions {
            window_start: created() - chrono::Duration::days(30),
            estimator: CostEstimator::default(),
            snapshot: SnapshotWriter::new(self.snapshot_dir()),
            started: Instant::now(),
        };
        PipelineRunner::new(Scoped::new("warehouse", source), Scoped::new("audit store", store), options)
    }

    fn stored_rows(&self) -> i64 {
        SqliteAuditStore::open(self.db_path(), DEFAULT_MAX_QUERY_LEN)
            .unwrap()
            .row_count()
            .unwrap()
    }

    fn assert_closed_once(&self) {
        assert_eq!(self.source_closes.get(), 1, "warehouse closes");
        assert_eq!(self.store_closes.get(), 1, "audit store closes");
    }
}

fn created() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 5, 14, 3, 9).unwrap()
}

fn query_job(id: &str, bytes: i64, sql: &str) -> WarehouseJob {
    WarehouseJob::query(id, "analytics-prod", created())
        .with_ended(created() + chrono::Duration::seconds(12))
        .with_bytes(Some(bytes), Some(bytes))
        .with_user("analyst@example.com")
        .with_query(sql)
}

fn assert_snapshot_timestamp(value: &Value) {
    let text = value.as_str().expect("timestamp serialized as string");
    assert_eq!(text.len(), 19);
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").expect("YYYY-MM-DD HH:MM:SS");
}

#[test]
fn test_full_run_two_jobs() {
    let harness = Harness::new();
    let jobs = vec![
        Some(query_job(
            "bquxjob_tib",
            TIB,
            "INSERT INTO `analytics-prod.ds.daily`\nSELECT * FROM `analytics-prod.ds.raw`",
        )),
        Some(query_job("bquxjob_zero", 0, "SELECT 1")),
    ];

    let summary = harness.runner(2, jobs, false, DEFAULT_MAX_QUERY_LEN).run().unwrap();

    let aggregate = summary.aggregate.unwrap();
    assert_eq!(aggregate.megabytes, 1_048_576);
    assert_eq!(aggregate.job_count, 2);
    assert_eq!(aggregate.cost, 5);
    assert_eq!(summary.collected, 2);
    assert!(summary.message().starts_with("Statistics uploaded. {mem: 1048576, len: 2, prc: 5}"));

    harness.assert_closed_once();
    assert_eq!(harness.commits.get(), 2);
    assert_eq!(harness.stored_rows(), 2);

    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.snapshot_path).unwrap()).unwrap();
    let object = snapshot.as_object().unwrap();
    assert_eq!(object.len(), 3);
    assert_eq!(snapshot["summary"]["mem"], 1_048_576);
    assert_eq!(snapshot["summary"]["len"], 2);
    assert_eq!(snapshot["summary"]["prc"], 5);

    assert_eq!(snapshot["indx_0"]["jid"], "bquxjob_tib");
    assert_eq!(snapshot["indx_0"]["prc"], 5);
    assert_eq!(snapshot["indx_0"]["dur"], 12);
    assert_eq!(snapshot["indx_0"]["obj"]["ins"], "analytics-prod.ds.daily");
    assert_eq!(snapshot["indx_0"]["obj"]["sel"], "analytics-prod.ds.raw");
    assert_eq!(snapshot["indx_0"]["crt"], "2026-10-05 14:03:09");
    assert_snapshot_timestamp(&snapshot["indx_0"]["crt"]);
    assert_snapshot_timestamp(&snapshot["indx_0"]["end"]);
    assert_snapshot_timestamp(&snapshot["indx_1"]["end"]);
    assert_eq!(snapshot["indx_1"]["jid"], "bquxjob_zero");
}

#[test]
fn test_empty_window_reports_nothing_processed() {
    let harness = Harness::new();
    let jobs = vec![
        None,
        Some(query_job("load_1", TIB, "").with_kind(JobKind::Load)),
    ];

    let summary = harness.runner(2, jobs, false, DEFAULT_MAX_QUERY_LEN).run().unwrap();

    assert!(summary.is_empty());
    assert_eq!(summary.message(), "Statistics were not processed");
    harness.assert_closed_once();
    assert_eq!(harness.commits.get(), 0);
    assert_eq!(harness.stored_rows(), 0);

    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.snapshot_path).unwrap()).unwrap();
    assert!(snapshot.get("summary").is_none());
    assert!(snapshot.as_object().unwrap().is_empty());
}

#[test]
fn test_listing_failure_still_releases_connections() {
    let harness = Harness::new();

    let err = harness
        .runner(3, vec![], true, DEFAULT_MAX_QUERY_LEN)
        .run()
        .unwrap_err();

    assert!(matches!(err, CostError::WarehouseApi { status: 500, .. }));
    harness.assert_closed_once();
    assert_eq!(std::fs::read_dir(harness.snapshot_dir()).unwrap().count(), 0);
}

#[test]
fn test_oversized_query_is_stored_without_text() {
    let harness = Harness::new();
    let long_sql = format!(
        "SELECT '{}' FROM `analytics-prod.ds.wide`",
        "x".repeat(200)
    );
    let jobs = vec![Some(query_job("bquxjob_long", 1024, &long_sql))];

    let summary = harness.runner(1, jobs, false, 64).run().unwrap();

    assert_eq!(summary.collected, 1);
    harness.assert_closed_once();
    // failed attempt + degraded attempt
    assert_eq!(harness.commits.get(), 2);

    let store = SqliteAuditStore::open(harness.db_path(), 64).unwrap();
    let (query, sel): (Option<String>, Option<String>) = store
        .connection()
        .unwrap()
        .query_row("SELECT QUERY, SEL_OBJ FROM GBQ_LOG WHERE JOB_ID = 'bquxjob_long'", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(query, None);
    assert_eq!(sel.as_deref(), Some("analytics-prod.ds.wide"));

    // the snapshot keeps the full text
    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.snapshot_path).unwrap()).unwrap();
    assert_eq!(snapshot["indx_0"]["sql"], long_sql.as_str());
}

#[test]
fn test_snapshot_failure_propagates_after_inserts() {
    let harness = Harness::new();
    let jobs = vec![Some(query_job("bquxjob_1", 10, "SELECT 1"))];
    let runner = harness.runner(1, jobs, false, DEFAULT_MAX_QUERY_LEN);
    std::fs::remove_dir_all(harness.snapshot_dir()).unwrap();

    let err = runner.run().unwrap_err();

    assert!(matches!(err, CostError::Io(_)));
    harness.assert_closed_once();
    assert_eq!(harness.stored_rows(), 1);
}

#[test]
fn test_quotes_rewritten_in_audit_row() {
    let harness = Harness::new();
    let jobs = vec![Some(query_job(
        "bquxjob_q",
        10,
        "SELECT * FROM `analytics-prod.ds.t` WHERE name = 'o''brien'",
    ))];

    harness.runner(1, jobs, false, DEFAULT_MAX_QUERY_LEN).run().unwrap();

    let store = SqliteAuditStore::open(harness.db_path(), DEFAULT_MAX_QUERY_LEN).unwrap();
    let query: String = store
        .connection()
        .unwrap()
        .query_row("SELECT QUERY FROM GBQ_LOG", [], |row| row.get(0))
        .unwrap();
    assert_eq!(query, "SELECT * FROM `analytics-prod.ds.t` WHERE name = \"o\"\"brien\"");
}
