//! BigQuery `jobs.list` client against a mock REST endpoint.
//!
//! The client blocks on a private runtime, so every call runs on a plain
//! thread outside the test's tokio runtime.

use std::time::Duration;

use audit_jobs::{BigQueryClient, BigQueryConfig, Closeable, CostError, JobKind, JobSource};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{bearer_token, method, path, query_param, query_param_is_missing},
};

const JOBS_PATH: &str = "/projects/analytics-prod/jobs";

fn config(base_url: String) -> BigQueryConfig {
    BigQueryConfig {
        base_url,
        project_id: Some("analytics-prod".into()),
        access_token: Some("test-token".into()),
        timeout: Duration::from_secs(5),
        page_size: 2,
    }
}

fn since() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 18, 0, 0, 0).unwrap()
}

fn entry(job_id: &str, job_type: &str) -> Value {
    json!({
        "jobReference": {"projectId": "analytics-prod", "jobId": job_id},
        "statistics": {
            "creationTime": "1790000000000",
            "endTime": "1790000004000",
            "query": {"totalBytesProcessed": "1099511627776"}
        },
        "configuration": {
            "jobType": job_type,
            "query": {"query": "SELECT * FROM `analytics-prod.ds.t`"}
        },
        "user_email": "analyst@example.com"
    })
}

/// Run `f` against a freshly connected client on its own thread.
fn with_client<T, F>(config: BigQueryConfig, f: F) -> audit_jobs::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut BigQueryClient) -> audit_jobs::Result<T> + Send + 'static,
{
    std::thread::spawn(move || {
        let mut client = BigQueryClient::connect(config)?;
        let result = f(&mut client);
        client.close();
        result
    })
    .join()
    .expect("client thread panicked")
}

async fn mount_two_pages(mock_server: &MockServer, projection: &str) {
    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .and(bearer_token("test-token"))
        .and(query_param("allUsers", "true"))
        .and(query_param("projection", projection))
        .and(query_param("maxResults", "2"))
        .and(query_param(
            "minCreationTime",
            since().timestamp_millis().to_string(),
        ))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#jobList",
            "jobs": [entry("job_a", "QUERY"), entry("job_b", "LOAD")],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .and(query_param("projection", projection))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#jobList",
            "jobs": [entry("job_c", "QUERY"), {"jobReference": {"jobId": "broken"}}]
        })))
        .expect(1)
        .mount(mock_server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_follows_page_tokens() {
    let mock_server = MockServer::start().await;
    mount_two_pages(&mock_server, "full").await;

    let jobs = with_client(config(mock_server.uri()), |client| client.list_jobs(since())).unwrap();

    assert_eq!(jobs.len(), 4);
    let a = jobs[0].as_ref().unwrap();
    assert_eq!(a.job_id, "job_a");
    assert_eq!(a.kind, JobKind::Query);
    assert_eq!(a.total_bytes, Some(1_099_511_627_776));
    assert_eq!(jobs[1].as_ref().unwrap().kind, JobKind::Load);
    assert_eq!(jobs[2].as_ref().unwrap().job_id, "job_c");
    assert!(jobs[3].is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_count_uses_minimal_projection() {
    let mock_server = MockServer::start().await;
    mount_two_pages(&mock_server, "minimal").await;

    let count = with_client(config(mock_server.uri()), |client| client.count_jobs(since())).unwrap();

    assert_eq!(count, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_listing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "bigquery#jobList"
        })))
        .mount(&mock_server)
        .await;

    let jobs = with_client(config(mock_server.uri()), |client| client.list_jobs(since())).unwrap();

    assert!(jobs.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_api_error_surfaces_status_and_message() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "Access Denied: Project analytics-prod: User does not have bigquery.jobs.list permission",
                "status": "PERMISSION_DENIED"
            }
        })))
        .mount(&mock_server)
        .await;

    let err = with_client(config(mock_server.uri()), |client| client.list_jobs(since())).unwrap_err();

    match err {
        CostError::WarehouseApi { status, message } => {
            assert_eq!(status, 403);
            assert!(message.starts_with("Access Denied"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_static_token_requires_project() {
    let mut config = config("http://127.0.0.1:9".into());
    config.project_id = None;

    let err = BigQueryClient::connect(config).unwrap_err();

    assert!(matches!(err, CostError::Config(_)));
}

#[test]
fn test_calls_after_close_fail() {
    let mut client = BigQueryClient::connect(config("http://127.0.0.1:9".into())).unwrap();
    client.close();
    client.close();

    assert!(client.count_jobs(since()).is_err());
}
