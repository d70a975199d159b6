//! Run configuration.
//!
//! Everything has a default anchored at the directory of the running
//! executable, so a bare `gbq-audit` invocation works when the binary sits
//! next to its `google-creds.json`. A YAML file can override any field:
//!
//! ```yaml
//! project_id: analytics-prod
//! window_months: 1
//! audit_db_path: /var/lib/gbq-audit/gbq_audit.db
//! snapshot_dir: /var/lib/gbq-audit/reports
//! price_per_tib: 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AuditError, Result};

/// Environment variable the Google auth stack reads the key file path from.
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Service account key file expected next to the executable.
pub const CREDENTIALS_FILE_NAME: &str = "google-creds.json";

/// Config file picked up from the install dir when `--config` is not given.
pub const CONFIG_FILE_NAME: &str = "gbq-audit.yaml";

/// Default BigQuery REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Directory containing the running executable.
pub fn install_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| AuditError::io("locating executable", PathBuf::from("."), e))?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| AuditError::internal(format!("executable has no parent: {}", exe.display())))
}

/// Configuration for one audit run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Service account key exported through `GOOGLE_APPLICATION_CREDENTIALS`
    pub credentials_path: PathBuf,

    /// Project whose jobs are listed (defaults to the credentials' project)
    pub project_id: Option<String>,

    /// Static bearer token; skips the credentials file entirely (emulators)
    pub access_token: Option<String>,

    /// BigQuery REST base URL
    pub api_base_url: String,

    /// HTTP timeout for warehouse calls
    pub request_timeout_secs: u64,

    /// Trailing window of job creation times, in calendar months
    pub window_months: u32,

    /// SQLite audit database
    pub audit_db_path: PathBuf,

    /// Directory receiving `gbq_report_<YYYYMMDD>.json`
    pub snapshot_dir: PathBuf,

    /// Currency units per tebibyte processed
    pub price_per_tib: u32,

    /// Longest query text the audit table accepts
    pub max_query_len: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let base = install_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            credentials_path: base.join(CREDENTIALS_FILE_NAME),
            project_id: None,
            access_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 60,
            window_months: 1,
            audit_db_path: base.join("gbq_audit.db"),
            snapshot_dir: base,
            price_per_tib: 5,
            max_query_len: 4000,
        }
    }
}

impl AuditConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `gbq-audit.yaml` in the
    /// install dir is used when present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(AuditError::config_not_found(path));
                }
                Self::from_file(path)?
            }
            None => {
                let candidate = install_dir()?.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    debug!(path = %candidate.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file without validating it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuditError::io("reading config", path, e))?;
        let config: Self = serde_yaml::from_str(&text).map_err(|e| AuditError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.window_months == 0 {
            return Err(AuditError::config_validation("window_months must be at least 1"));
        }
        if self.max_query_len == 0 {
            return Err(AuditError::config_validation("max_query_len must be greater than zero"));
        }
        if self.audit_db_path.as_os_str().is_empty() {
            return Err(AuditError::config_validation("audit_db_path cannot be empty"));
        }
        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(AuditError::config_validation("snapshot_dir cannot be empty"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(AuditError::config_validation("api_base_url cannot be empty"));
        }
        Ok(())
    }

    /// Point `GOOGLE_APPLICATION_CREDENTIALS` at the configured key file.
    ///
    /// Must run before the warehouse client initializes and before any other
    /// thread is spawned. A configured `access_token` makes this a no-op.
    pub fn export_credentials(&self) -> Result<()> {
        if self.access_token.is_some() {
            debug!("static access token configured, not exporting credentials");
            return Ok(());
        }
        if !self.credentials_path.is_file() {
            return Err(AuditError::CredentialsNotFound {
                path: self.credentials_path.clone(),
            });
        }

        // SAFETY: the binary calls this before logging or the warehouse client
        // start any thread; tests touching the environment run serially.
        unsafe { std::env::set_var(CREDENTIALS_ENV_VAR, &self.credentials_path) };
        info!(path = %self.credentials_path.display(), "exported warehouse credentials");
        Ok(())
    }
}
