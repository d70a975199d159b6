//! BigQuery REST implementation of [`JobSource`].
//!
//! Lists jobs through `GET /projects/{project}/jobs` with `allUsers=true`,
//! following `nextPageToken`. The pipeline is synchronous, so the client owns
//! a private current-thread tokio runtime and blocks on each request.
//!
//! Authentication comes from `gcp_auth` (which reads
//! `GOOGLE_APPLICATION_CREDENTIALS`) or from a static bearer token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gcp_auth::TokenProvider;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, info, trace, warn};

use crate::error::{CostError, Result};
use crate::models::{ErrorDetail, JobKind, WarehouseJob};
use crate::scope::Closeable;
use crate::warehouse::JobSource;

const BIGQUERY_SCOPES: &[&str] = &["https://www.googleapis.com/auth/bigquery"];

/// Page size requested from `jobs.list`.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Connection settings for [`BigQueryClient`].
#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    /// REST base URL, e.g. `https://bigquery.googleapis.com/bigquery/v2`
    pub base_url: String,
    /// Project to list jobs for; defaults to the credentials' project
    pub project_id: Option<String>,
    /// Static bearer token instead of `gcp_auth` discovery
    pub access_token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// `maxResults` per page
    pub page_size: u32,
}

impl BigQueryConfig {
    pub fn from_audit_config(config: &audit_core::AuditConfig) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            access_token: config.access_token.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

enum Auth {
    Static(String),
    Provider(Arc<dyn TokenProvider>),
}

/// Blocking BigQuery job-listing client.
pub struct BigQueryClient {
    runtime: Option<Runtime>,
    http: reqwest::Client,
    auth: Auth,
    base_url: String,
    project_id: String,
    page_size: u32,
}

impl std::fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("closed", &self.runtime.is_none())
            .finish_non_exhaustive()
    }
}

impl BigQueryClient {
    /// Create the client and resolve credentials and project.
    ///
    /// Must not be called from inside an async runtime.
    pub fn connect(config: BigQueryConfig) -> Result<Self> {
        info!(base_url = %config.base_url, "Connecting to BigQuery");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("gbq-audit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (auth, project_id) = match config.access_token {
            Some(token) => {
                let project_id = config.project_id.ok_or_else(|| {
                    CostError::Config("project_id is required with a static access token".into())
                })?;
                (Auth::Static(token), project_id)
            }
            None => {
                let provider = runtime
                    .block_on(gcp_auth::provider())
                    .map_err(|e| CostError::Auth(format!("failed to initialize GCP auth: {e}")))?;
                let project_id = match config.project_id {
                    Some(project_id) => project_id,
                    None => runtime
                        .block_on(provider.project_id())
                        .map_err(|e| CostError::Auth(format!("no project in credentials: {e}")))?
                        .to_string(),
                };
                (Auth::Provider(provider), project_id)
            }
        };

        info!(project = %project_id, "Established BigQuery connection");

        Ok(Self {
            runtime: Some(runtime),
            http,
            auth,
            base_url: config.base_url,
            project_id,
            page_size: config.page_size,
        })
    }

    /// Project whose jobs are listed.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| CostError::Config("BigQuery client is closed".into()))
    }

    async fn access_token(&self) -> Result<String> {
        match &self.auth {
            Auth::Static(token) => Ok(token.clone()),
            Auth::Provider(provider) => {
                let token = provider
                    .token(BIGQUERY_SCOPES)
                    .await
                    .map_err(|e| CostError::Auth(format!("failed to get access token: {e}")))?;
                Ok(token.as_str().to_string())
            }
        }
    }

    /// Fetch every page of `jobs.list` and return the raw job entries.
    async fn fetch_all(&self, since: DateTime<Utc>, projection: &str) -> Result<Vec<Value>> {
        let url = format!("{}/projects/{}/jobs", self.base_url, self.project_id);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page = 0;

        loop {
            let token = self.access_token().await?;
            let mut query = vec![
                ("allUsers", "true".to_string()),
                ("minCreationTime", since.timestamp_millis().to_string()),
                ("projection", projection.to_string()),
                ("maxResults", self.page_size.to_string()),
            ];
            if let Some(page_token) = &page_token {
                query.push(("pageToken", page_token.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&query)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CostError::WarehouseApi {
                    status: status.as_u16(),
                    message: api_error_message(&body),
                });
            }

            let mut body: Value = response.json().await?;
            page += 1;

            if let Some(Value::Array(jobs)) = body.get_mut("jobs").map(Value::take) {
                debug!(page, count = jobs.len(), projection, "Fetched job page");
                entries.extend(jobs);
            }

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }
}

impl JobSource for BigQueryClient {
    fn count_jobs(&mut self, since: DateTime<Utc>) -> Result<usize> {
        let entries = self.runtime()?.block_on(self.fetch_all(since, "minimal"))?;
        Ok(entries.len())
    }

    fn list_jobs(&mut self, since: DateTime<Utc>) -> Result<Vec<Option<WarehouseJob>>> {
        let entries = self.runtime()?.block_on(self.fetch_all(since, "full"))?;
        Ok(entries.iter().map(parse_job).collect())
    }
}

impl Closeable for BigQueryClient {
    fn close(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            info!(project = %self.project_id, "BigQuery connection closed");
        }
    }
}

/// Interpret one `jobs.list` entry. `None` when identity or creation time is
/// missing.
pub fn parse_job(value: &Value) -> Option<WarehouseJob> {
    let reference = value.get("jobReference")?;
    let job_id = reference.get("jobId")?.as_str()?.to_string();
    let project = reference.get("projectId")?.as_str()?.to_string();

    let statistics = value.get("statistics");
    let created = statistics
        .and_then(|s| s.get("creationTime"))
        .and_then(timestamp_millis);
    let Some(created) = created else {
        trace!(job_id, "job without creation time");
        return None;
    };
    let ended = statistics
        .and_then(|s| s.get("endTime"))
        .and_then(timestamp_millis);

    let configuration = value.get("configuration");
    let kind = configuration.map(job_kind).unwrap_or(JobKind::Unknown);
    let query_stats = statistics.and_then(|s| s.get("query"));

    let total_bytes = query_stats
        .and_then(|q| q.get("totalBytesProcessed"))
        .or_else(|| statistics.and_then(|s| s.get("totalBytesProcessed")))
        .and_then(int64);

    Some(WarehouseJob {
        job_id,
        project,
        kind,
        billing_tier: query_stats.and_then(|q| q.get("billingTier")).and_then(int64),
        created,
        ended,
        dry_run: configuration
            .and_then(|c| c.get("dryRun"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        estimated_bytes: query_stats
            .and_then(|q| q.get("estimatedBytesProcessed"))
            .and_then(int64),
        total_bytes,
        user_email: value
            .get("user_email")
            .and_then(Value::as_str)
            .map(str::to_string),
        query: configuration
            .and_then(|c| c.get("query"))
            .and_then(|q| q.get("query"))
            .and_then(Value::as_str)
            .map(str::to_string),
        dml_affected_rows: query_stats
            .and_then(|q| q.get("numDmlAffectedRows"))
            .and_then(int64),
        error: value
            .get("errorResult")
            .or_else(|| value.get("status").and_then(|s| s.get("errorResult")))
            .map(error_detail),
    })
}

/// `configuration.jobType`, falling back to whichever config block is present.
fn job_kind(configuration: &Value) -> JobKind {
    if let Some(job_type) = configuration.get("jobType").and_then(Value::as_str) {
        return JobKind::from_api(job_type);
    }
    ["query", "load", "copy", "extract"]
        .into_iter()
        .find(|key| configuration.get(key).is_some())
        .map(JobKind::from_api)
        .unwrap_or(JobKind::Unknown)
}

fn error_detail(value: &Value) -> ErrorDetail {
    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
    ErrorDetail {
        message: field("message"),
        location: field("location"),
        reason: field("reason"),
    }
}

/// BigQuery encodes int64 as JSON strings.
fn int64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn timestamp_millis(value: &Value) -> Option<DateTime<Utc>> {
    int64(value).and_then(DateTime::from_timestamp_millis)
}

/// Pull `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => {
            warn!("non-JSON error body from BigQuery");
            body.to_string()
        }
    }
}
