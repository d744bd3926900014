//! End-to-end API tests against the in-process router.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::{fixtures, TestConfig, TestFixture};

fn mp4_job(url: &str) -> serde_json::Value {
    json!({ "url": url, "format": "mp4" })
}

async fn submit(fixture: &TestFixture, body: serde_json::Value) -> String {
    let response = fixture.post("/api/v1/jobs", body).await;
    assert_eq!(response.status, StatusCode::ACCEPTED, "{}", response.body);
    response.body["id"].as_str().unwrap().to_string()
}

// ============================================================================
// Health, config, metrics
// ============================================================================

#[tokio::test]
async fn test_health_reports_running_pipeline() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["jobs"]["running"], true);
    assert_eq!(response.body["tunnels_leased"], 0);

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_health_degraded_after_shutdown() {
    let fixture = TestFixture::new().await;
    fixture.pipeline.shutdown().await;

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "degraded");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["tunnels"]["peers"][0]["id"], "a");

    let text = response.body.to_string();
    assert!(!text.contains(fixtures::PRIVATE_KEY));

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_pool_gauges() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/api/v1/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("burrow_tunnels_by_state"));
    assert!(body.contains("burrow_jobs_by_status"));
    assert!(body.contains("burrow_http_requests_total"));

    fixture.pipeline.shutdown().await;
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_submit_runs_to_done() {
    let fixture = TestFixture::new().await;

    let id = submit(&fixture, mp4_job("https://example.test/video.mp4")).await;
    let job = fixture.wait_for_terminal(&id).await;

    assert_eq!(job["status"], "done");
    assert_eq!(job["result"]["cached"], false);
    let statuses: Vec<&str> = job["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|change| change["status"].as_str().unwrap())
        .collect();
    assert_eq!(
        statuses,
        vec!["queued", "tunnel_acquired", "fetching", "transcoding", "done"]
    );

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_repeat_submit_served_from_cache() {
    let fixture = TestFixture::new().await;

    let first = submit(&fixture, mp4_job("https://example.test/video.mp4")).await;
    fixture.wait_for_terminal(&first).await;

    let response = fixture
        .post("/api/v1/jobs", mp4_job("https://example.test/video.mp4"))
        .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "done");
    assert_eq!(response.body["result"]["cached"], true);
    assert_eq!(fixture.pipeline.fetcher.fetch_count().await, 1);

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_submit_rejects_bad_requests() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/jobs", json!({ "url": "ftp://example.test/a", "format": "mp4" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "invalid_request");

    let response = fixture
        .post("/api/v1/jobs", json!({ "url": "https://example.test/a", "format": "avi" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["kind"], "unsupported_format");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "url": "https://example.test/a", "format": "mp4", "quality": 123 }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    assert_eq!(fixture.pipeline.fetcher.fetch_count().await, 0);
    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_requester_allow_list_and_throttle() {
    let fixture = TestFixture::with_config(TestConfig {
        configure: Box::new(|settings| {
            settings.access.allowed_requesters = vec!["alice".to_string()];
            settings.access.min_submit_interval_secs = 60;
        }),
        ..TestConfig::default()
    })
    .await;

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "url": "https://example.test/a", "format": "mp3", "requester": "mallory" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    submit(
        &fixture,
        json!({ "url": "https://example.test/a", "format": "mp3", "requester": "alice" }),
    )
    .await;

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "url": "https://example.test/b", "format": "mp3", "requester": "alice" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body["kind"], "throttled");

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_get_job_errors() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/jobs/not-a-uuid").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = fixture
        .get("/api/v1/jobs/550e8400-e29b-41d4-a716-446655440000")
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cancel_mid_fetch_releases_tunnel() {
    let fixture = TestFixture::new().await;
    fixture
        .pipeline
        .fetcher
        .set_delay(Duration::from_secs(30))
        .await;

    let id = submit(&fixture, mp4_job("https://example.test/slow.mp4")).await;
    let job_id = id.parse().unwrap();
    fixture
        .pipeline
        .wait_until(&job_id, |job| job.status == burrow_core::JobStatus::Fetching)
        .await;

    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_eq!(response.status, StatusCode::OK);

    let job = fixture.wait_for_terminal(&id).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["failure"]["kind"], "cancelled");

    let pool = fixture.get("/api/v1/tunnels").await;
    assert_eq!(pool.status, StatusCode::OK);
    assert!(pool.body["tunnels"]
        .as_array()
        .unwrap()
        .iter()
        .all(|tunnel| tunnel["leased"] == false));

    // Cancelling again is a conflict
    let response = fixture.delete(&format!("/api/v1/jobs/{}", id)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let fixture = TestFixture::new().await;

    let done = submit(&fixture, mp4_job("https://example.test/one.mp4")).await;
    fixture.wait_for_terminal(&done).await;

    let response = fixture.get("/api/v1/jobs?status=done").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["jobs"][0]["id"], done.as_str());

    let response = fixture.get("/api/v1/jobs?status=failed").await;
    assert_eq!(response.body["total"], 0);

    fixture.pipeline.shutdown().await;
}

// ============================================================================
// Tunnels and cache
// ============================================================================

#[tokio::test]
async fn test_tunnel_pool_status() {
    let fixture = TestFixture::new().await;

    let id = submit(&fixture, mp4_job("https://example.test/video.mp4")).await;
    fixture.wait_for_terminal(&id).await;

    let response = fixture.get("/api/v1/tunnels").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["configured"], 1);
    assert_eq!(response.body["tunnels"][0]["id"], "a");
    assert_eq!(response.body["tunnels"][0]["state"], "active");

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_tunnel_reload_keeps_inline_peers() {
    let fixture = TestFixture::new().await;

    let response = fixture.post("/api/v1/tunnels/reload", json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["configured"], 1);

    fixture.pipeline.shutdown().await;
}

#[tokio::test]
async fn test_cache_stats_and_cleanup() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/cache/stats").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["files"], 0);

    let id = submit(&fixture, mp4_job("https://example.test/video.mp4")).await;
    fixture.wait_for_terminal(&id).await;

    let response = fixture.get("/api/v1/cache/stats").await;
    assert_eq!(response.body["files"], 1);

    let response = fixture.post("/api/v1/cache/cleanup", json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["removed_files"], 0);

    fixture.pipeline.shutdown().await;
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_api_key_guards_job_routes_only() {
    let fixture = TestFixture::with_config(TestConfig::with_api_key("s3cret")).await;

    let response = fixture
        .request_with_headers("GET", "/api/v1/jobs", &[])
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = fixture
        .request_with_headers("GET", "/api/v1/jobs", &[("X-API-Key", "s3cret")])
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = fixture
        .request_with_headers("GET", "/api/v1/health", &[])
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // The fixture's own requests carry the bearer key
    let response = fixture.get("/api/v1/tunnels").await;
    assert_eq!(response.status, StatusCode::OK);

    fixture.pipeline.shutdown().await;
}
