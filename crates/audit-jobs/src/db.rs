//! Audit table persistence.
//!
//! [`AuditWriter`] maps each [`JobRecord`] onto one `GBQ_LOG` row and owns
//! the failure policy: a failed insert is committed away and retried once
//! with the query text nulled out. [`AuditStore`] is the seam to the
//! relational store; [`SqliteAuditStore`] is the rusqlite implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, named_params};
use tracing::{debug, info, warn};

use crate::error::{CostError, Result};
use crate::models::JobRecord;
use crate::scope::Closeable;

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Default upper bound on stored query text, in characters.
pub const DEFAULT_MAX_QUERY_LEN: usize = 4000;

const INSERT_SQL: &str = "INSERT INTO GBQ_LOG (
        JOB_ID, PROJECT, BILLING, CREATED, ENDED, DURATION, DRY_RUN,
        ESTIMATED_BYTES, TOTAL_BYTES, PRICE, EMAIL, QUERY, NUM_DML_AFFECTED_ROWS,
        INS_OBJ, SEL_OBJ, UPD_OBJ, DEL_OBJ, ERR_MSG, ERR_LOC, ERR_RES
    ) VALUES (
        :jid, :prj, :bil, :crt, :end, :dur, :dry,
        :est, :mem, :prc, :eml, :sql, :aff,
        :ins, :sel, :upd, :del, :err_msg, :err_loc, :err_res
    )";

/// One `GBQ_LOG` row, parameter for parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub job_id: String,
    pub project: String,
    pub billing_tier: Option<i64>,
    pub created: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub dry_run: bool,
    pub estimated_bytes: i64,
    pub total_bytes: i64,
    pub price: i64,
    pub email: Option<String>,
    pub query: Option<String>,
    pub dml_affected_rows: Option<i64>,
    pub ins_obj: Option<String>,
    pub sel_obj: Option<String>,
    pub upd_obj: Option<String>,
    pub del_obj: Option<String>,
    pub err_msg: Option<String>,
    pub err_loc: Option<String>,
    pub err_res: Option<String>,
}

impl AuditRow {
    /// Map a record onto the table. Single quotes in the query text become
    /// double quotes.
    pub fn from_record(record: &JobRecord) -> Self {
        let error = record.error.as_ref();
        Self {
            job_id: record.job_id.clone(),
            project: record.project.clone(),
            billing_tier: record.billing_tier,
            created: record.created,
            ended: record.ended,
            duration_secs: record.duration_secs(),
            dry_run: record.dry_run,
            estimated_bytes: record.estimated_bytes,
            total_bytes: record.total_bytes(),
            price: record.cost(),
            email: record.user_email.clone(),
            query: record
                .query
                .as_deref()
                .filter(|q| !q.is_empty())
                .map(|q| q.replace('\'', "\"")),
            dml_affected_rows: record.dml_affected_rows,
            ins_obj: record.affected.inserted.clone(),
            sel_obj: record.affected.selected.clone(),
            upd_obj: record.affected.updated.clone(),
            del_obj: record.affected.deleted.clone(),
            err_msg: error.and_then(|e| e.message.clone()),
            err_loc: error.and_then(|e| e.location.clone()),
            err_res: error.and_then(|e| e.reason.clone()),
        }
    }

    /// Same row with the query text dropped.
    pub fn without_query(&self) -> Self {
        Self {
            query: None,
            ..self.clone()
        }
    }
}

/// Relational store receiving audit rows.
pub trait AuditStore: Closeable {
    /// Execute one insert in the current transaction.
    fn insert_row(&mut self, row: &AuditRow) -> Result<()>;

    /// Commit the current transaction. A no-op when nothing is pending.
    fn commit(&mut self) -> Result<()>;
}

/// Writes job records into the audit table.
pub struct AuditWriter<'a, S: AuditStore> {
    store: &'a mut S,
}

impl<'a, S: AuditStore> AuditWriter<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Persist one record.
    ///
    /// Every insert is followed by a commit. When the insert itself fails
    /// the row is retried once without query text, oversized or oddly quoted
    /// SQL being the usual culprit; if that fails too the error propagates.
    /// A failed commit propagates as is and is never retried.
    pub fn insert(&mut self, record: &JobRecord) -> Result<()> {
        let row = AuditRow::from_record(record);

        let inserted = self.store.insert_row(&row);
        self.store.commit()?;
        let Err(first) = inserted else {
            debug!(job_id = %row.job_id, "audit row stored");
            return Ok(());
        };

        warn!(
            job_id = %row.job_id,
            error = %first,
            "audit insert failed, retrying without query text"
        );

        let retried = self.store.insert_row(&row.without_query());
        let committed = self.store.commit();
        retried
            .and(committed)
            .map_err(|source| CostError::InsertFailed {
                job_id: row.job_id.clone(),
                first: first.to_string(),
                source: Box::new(source),
            })?;

        info!(job_id = %row.job_id, "audit row stored without query text");
        Ok(())
    }
}

/// SQLite-backed audit store.
///
/// Inserts open a transaction implicitly and [`AuditStore::commit`] ends it.
/// Query text longer than `max_query_len` characters fails the insert the
/// same way a bounded VARCHAR column would. The limit is checked on every
/// insert, so it follows the value passed to the latest `open`.
pub struct SqliteAuditStore {
    conn: Option<Connection>,
    max_query_len: usize,
}

impl SqliteAuditStore {
    /// Open or create the audit database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, max_query_len: usize) -> Result<Self> {
        let path = path.as_ref();
        check_query_limit(max_query_len)?;
        let store = Self {
            conn: Some(Connection::open(path)?),
            max_query_len,
        };
        store.migrate()?;
        info!(path = %path.display(), "Connection to audit database established");
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory(max_query_len: usize) -> Result<Self> {
        check_query_limit(max_query_len)?;
        let store = Self {
            conn: Some(Connection::open_in_memory()?),
            max_query_len,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Get the connection for read queries.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(CostError::StoreClosed)
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> Result<i64> {
        let count = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM GBQ_LOG", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Longest query text accepted, in characters.
    pub fn max_query_len(&self) -> usize {
        self.max_query_len
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running audit database migrations"
            );
            Self::migration_v1(conn)?;
        }

        Ok(())
    }

    /// Migration to version 1: the audit table.
    fn migration_v1(conn: &Connection) -> Result<()> {
        debug!("Running migration v1: GBQ_LOG");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS GBQ_LOG (
                ID INTEGER PRIMARY KEY AUTOINCREMENT,
                JOB_ID TEXT NOT NULL,
                PROJECT TEXT,
                BILLING INTEGER,
                CREATED TEXT,
                ENDED TEXT,
                DURATION INTEGER NOT NULL DEFAULT 0,
                DRY_RUN INTEGER,
                ESTIMATED_BYTES INTEGER NOT NULL DEFAULT 0,
                TOTAL_BYTES INTEGER NOT NULL DEFAULT 0,
                PRICE INTEGER NOT NULL DEFAULT 0,
                EMAIL TEXT,
                QUERY TEXT,
                NUM_DML_AFFECTED_ROWS INTEGER,
                INS_OBJ TEXT,
                SEL_OBJ TEXT,
                UPD_OBJ TEXT,
                DEL_OBJ TEXT,
                ERR_MSG TEXT,
                ERR_LOC TEXT,
                ERR_RES TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_gbq_log_job_id ON GBQ_LOG(JOB_ID)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_gbq_log_created ON GBQ_LOG(CREATED)",
            [],
        )?;

        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

        info!("Migration v1 completed");
        Ok(())
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert_row(&mut self, row: &AuditRow) -> Result<()> {
        if let Some(query) = &row.query {
            let len = query.chars().count();
            if len > self.max_query_len {
                return Err(CostError::QueryTooLong {
                    len,
                    max: self.max_query_len,
                });
            }
        }

        let conn = self.connection()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }

        // Statement is finalized when it drops at the end of this scope.
        let mut stmt = conn.prepare(INSERT_SQL)?;
        stmt.execute(named_params! {
            ":jid": row.job_id,
            ":prj": row.project,
            ":bil": row.billing_tier,
            ":crt": row.created.to_rfc3339(),
            ":end": row.ended.map(|t| t.to_rfc3339()),
            ":dur": row.duration_secs,
            ":dry": row.dry_run,
            ":est": row.estimated_bytes,
            ":mem": row.total_bytes,
            ":prc": row.price,
            ":eml": row.email,
            ":sql": row.query,
            ":aff": row.dml_affected_rows,
            ":ins": row.ins_obj,
            ":sel": row.sel_obj,
            ":upd": row.upd_obj,
            ":del": row.del_obj,
            ":err_msg": row.err_msg,
            ":err_loc": row.err_loc,
            ":err_res": row.err_res,
        })?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

fn check_query_limit(max_query_len: usize) -> Result<()> {
    if max_query_len == 0 {
        return Err(CostError::Config("max_query_len must be positive".into()));
    }
    Ok(())
}

impl Closeable for SqliteAuditStore {
    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            match conn.close() {
                Ok(()) => info!("Audit database connection closed"),
                Err((_, e)) => warn!(error = %e, "Failed to close audit database cleanly"),
            }
        }
    }
}
