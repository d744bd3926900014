//! Common test utilities for E2E testing with mocks.
//!
//! Builds the real router over a [`TestPipeline`]: scheduler, tunnel pool and
//! cache run for real while host networking, fetching and transcoding are
//! mocked, so no root, WireGuard or ffmpeg is needed.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use burrow_core::testing::{PipelineSettings, TestPipeline};
use burrow_core::tunnel::TunnelConfig;
use burrow_core::Config;
use burrow_server::api::create_router;
use burrow_server::state::AppState;

/// Re-export fixtures for test convenience
pub use burrow_core::testing::fixtures;

/// In-process server with the pipeline behind it.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/jobs", json!({
///         "url": "https://example.test/video.mp4",
///         "format": "mp4"
///     })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub pipeline: TestPipeline,
    api_key: Option<String>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
pub struct TestConfig {
    pub peers: Vec<TunnelConfig>,
    pub api_key: Option<String>,
    pub configure: Box<dyn FnOnce(&mut PipelineSettings)>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            peers: vec![fixtures::tunnel_config("a", "10.1.0.0/16")],
            api_key: None,
            configure: Box::new(|_| {}),
        }
    }
}

impl TestConfig {
    pub fn with_api_key(key: &str) -> Self {
        Self {
            api_key: Some(key.to_string()),
            ..Self::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with one tunnel and no API key.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let pipeline = TestPipeline::start_with(test_config.peers.clone(), test_config.configure);

        let mut config = Config::default();
        config.server.api_key = test_config.api_key.clone();
        config.tunnels.peers = test_config.peers;

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&pipeline.scheduler),
            Arc::clone(&pipeline.tunnels),
            Arc::clone(&pipeline.cache),
        ));

        Self {
            router: create_router(state),
            pipeline,
            api_key: test_config.api_key,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// GET returning the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = self.builder("GET", path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request with an explicit set of headers and no fixture key.
    pub async fn request_with_headers(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    fn builder(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(path);
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = self.builder(method, path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Poll `GET /jobs/{id}` until the job is `done` or `failed`.
    pub async fn wait_for_terminal(&self, id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let response = self.get(&format!("/api/v1/jobs/{}", id)).await;
            let status = response.body["status"].as_str().unwrap_or_default().to_string();
            if status == "done" || status == "failed" {
                return response.body;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {} did not finish: {}", id, response.body);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
