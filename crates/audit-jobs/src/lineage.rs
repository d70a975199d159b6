//! Best-effort lineage extraction from raw SQL.
//!
//! The scanner looks for three governing keywords, case-insensitively:
//!
//! - `INTO`   → inserted object
//! - `UPDATE` → updated object
//! - `FROM`   → selected object when the text contains `SELECT`, deleted
//!   object when it contains `DELETE` (both when it contains both)
//!
//! A keyword match runs to the end of its line, and the object name is the
//! text between the first and second backtick of that match, following the
//! `` `project.dataset.table` `` quoting convention. Nothing here builds an
//! AST: joins, subqueries and CTEs on the same line collapse into the first
//! quoted name.
//!
//! ```
//! use audit_jobs::lineage::extract;
//!
//! let objs = extract("INSERT INTO `prj.ds.target`\nSELECT * FROM `prj.ds.source`");
//! assert_eq!(objs.inserted.as_deref(), Some("prj.ds.target"));
//! assert_eq!(objs.selected.as_deref(), Some("prj.ds.source"));
//! assert_eq!(objs.updated, None);
//! ```

use thiserror::Error;
use tracing::debug;

use crate::models::AffectedObjects;

/// Why a query text could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// NUL byte in the text: not SQL, most likely a truncated binary payload
    #[error("binary content at byte {offset}")]
    BinaryContent { offset: usize },
}

/// One detected clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Insert(String),
    Select(String),
    Update(String),
    Delete(String),
    /// `FROM` without a `SELECT` or `DELETE` anywhere in the text
    Unknown,
}

/// Extract affected objects, degrading to an empty result on parse failure.
///
/// Lineage is informational: a query that cannot be scanned is still audited,
/// just without objects. This never fails.
pub fn extract(sql: &str) -> AffectedObjects {
    match try_extract(sql) {
        Ok(objs) => objs,
        Err(e) => {
            debug!(error = %e, "lineage scan failed, recording no objects");
            AffectedObjects::default()
        }
    }
}

/// Extract affected objects, surfacing scan failures.
pub fn try_extract(sql: &str) -> Result<AffectedObjects, ParseError> {
    let mut inserted = Vec::new();
    let mut selected = Vec::new();
    let mut updated = Vec::new();
    let mut deleted = Vec::new();

    for clause in scan(sql)? {
        match clause {
            Clause::Insert(name) => inserted.push(name),
            Clause::Select(name) => selected.push(name),
            Clause::Update(name) => updated.push(name),
            Clause::Delete(name) => deleted.push(name),
            Clause::Unknown => {}
        }
    }

    Ok(AffectedObjects {
        inserted: join_slot(inserted),
        selected: join_slot(selected),
        updated: join_slot(updated),
        deleted: join_slot(deleted),
    })
}

/// Scan `sql` into clauses, grouped by keyword, each group in source order.
pub fn scan(sql: &str) -> Result<Vec<Clause>, ParseError> {
    if let Some(offset) = sql.find('\0') {
        return Err(ParseError::BinaryContent { offset });
    }

    let lower = sql.to_ascii_lowercase();
    let has_select = lower.contains("select");
    let has_delete = lower.contains("delete");

    let mut clauses = Vec::new();

    for segment in KeywordMatches::new(sql, &lower, "into") {
        clauses.push(Clause::Insert(quoted_name(segment)));
    }

    for segment in KeywordMatches::new(sql, &lower, "from") {
        let name = quoted_name(segment);
        match (has_select, has_delete) {
            (false, false) => clauses.push(Clause::Unknown),
            (true, false) => clauses.push(Clause::Select(name)),
            (false, true) => clauses.push(Clause::Delete(name)),
            (true, true) => {
                clauses.push(Clause::Select(name.clone()));
                clauses.push(Clause::Delete(name));
            }
        }
    }

    for segment in KeywordMatches::new(sql, &lower, "update") {
        clauses.push(Clause::Update(quoted_name(segment)));
    }

    Ok(clauses)
}

/// Text between the first and second backtick.
///
/// No backtick gives an empty name; a lone opening backtick gives the rest
/// of the segment.
fn quoted_name(segment: &str) -> String {
    let mut parts = segment.split('`');
    parts.next();
    parts.next().unwrap_or_default().to_string()
}

/// One name as-is; several names each followed by a comma. Empty is absent.
fn join_slot(names: Vec<String>) -> Option<String> {
    let text = if names.len() > 1 {
        names.iter().map(|name| format!("{name},")).collect()
    } else {
        names.into_iter().next().unwrap_or_default()
    };
    (!text.is_empty()).then_some(text)
}

/// Keyword occurrences, each extended to the end of its line.
///
/// After a match the search resumes at the end of that line, so one line
/// yields at most one match per keyword.
struct KeywordMatches<'a> {
    sql: &'a str,
    lower: &'a str,
    keyword: &'static str,
    pos: usize,
}

impl<'a> KeywordMatches<'a> {
    /// `lower` must be `sql.to_ascii_lowercase()` so byte offsets line up.
    fn new(sql: &'a str, lower: &'a str, keyword: &'static str) -> Self {
        Self {
            sql,
            lower,
            keyword,
            pos: 0,
        }
    }
}

impl<'a> Iterator for KeywordMatches<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.pos + self.lower.get(self.pos..)?.find(self.keyword)?;
        let end = self.sql[start..]
            .find('\n')
            .map_or(self.sql.len(), |offset| start + offset);
        self.pos = end;
        Some(&self.sql[start..end])
    }
}
