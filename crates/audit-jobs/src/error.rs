//! Error types for the audit pipeline.

use thiserror::Error;

/// Audit pipeline errors.
#[derive(Error, Debug)]
pub enum CostError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Both the full and the degraded insert of a job failed
    #[error("audit insert failed for job {job_id} (first attempt: {first}): {source}")]
    InsertFailed {
        /// Job whose row could not be written
        job_id: String,
        /// Error from the attempt with query text
        first: String,
        /// Error from the degraded attempt
        #[source]
        source: Box<CostError>,
    },

    /// Audit store was used after being closed
    #[error("audit store is closed")]
    StoreClosed,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (snapshot file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Warehouse API returned an error response
    #[error("warehouse API error ({status}): {message}")]
    WarehouseApi {
        /// HTTP status code
        status: u16,
        /// Error message from the response body
        message: String,
    },

    /// Authentication with the warehouse failed
    #[error("warehouse authentication failed: {0}")]
    Auth(String),

    /// Query text longer than the audit table accepts
    #[error("query text is {len} characters, the audit table accepts at most {max}")]
    QueryTooLong {
        /// Length of the rejected text, in characters
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl CostError {
    /// Create a user-friendly message for this error.
    pub fn friendly_message(&self) -> String {
        match self {
            CostError::WarehouseApi { status: 401 | 403, .. } | CostError::Auth(_) => {
                "BigQuery rejected the credentials. Check google-creds.json and its roles.".to_string()
            }
            CostError::InsertFailed { job_id, .. } => {
                format!("Could not store job {} in the audit table, even without query text.", job_id)
            }
            CostError::Io(e) => {
                let msg = e.to_string().to_lowercase();
                if msg.contains("permission") {
                    "Permission denied. Check file permissions.".to_string()
                } else if msg.contains("not found") {
                    "File or directory not found.".to_string()
                } else {
                    format!("File system error: {}", e)
                }
            }
            _ => format!("Error: {}", self),
        }
    }
}

/// Result type for audit pipeline operations.
pub type Result<T> = std::result::Result<T, CostError>;
