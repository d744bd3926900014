//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// API key middleware.
///
/// Passes every request through when no key is configured. Otherwise the
/// key must arrive as `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.api_key() else {
        return Ok(next.run(request).await);
    };

    match presented_key(request.headers()) {
        Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["invalid_credentials"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["not_authenticated"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    bearer
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
        })
        .filter(|key| !key.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::Request, middleware, routing::get, Router};
    use burrow_core::testing::{fixtures, TestPipeline};
    use burrow_core::Config;
    use tower::ServiceExt;

    async fn dummy_handler() -> &'static str {
        "OK"
    }

    fn app(api_key: Option<&str>) -> (Router, TestPipeline) {
        let pipeline = TestPipeline::start(vec![fixtures::tunnel_config("a", "10.1.0.0/16")]);
        let mut config = Config::default();
        config.server.api_key = api_key.map(str::to_string);

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&pipeline.scheduler),
            Arc::clone(&pipeline.tunnels),
            Arc::clone(&pipeline.cache),
        ));

        let router = Router::new()
            .route("/test", get(dummy_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);
        (router, pipeline)
    }

    async fn status_for(router: Router, request: Request<Body>) -> StatusCode {
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_no_key_configured_allows_all() {
        let (router, _pipeline) = app(None);
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_key_counts_as_unconfigured() {
        let (router, _pipeline) = app(Some(""));
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_key_valid() {
        let (router, _pipeline) = app(Some("secret-key"));
        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_key_invalid() {
        let (router, _pipeline) = app(Some("secret-key"));
        let request = Request::builder()
            .uri("/test")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_key_missing() {
        let (router, _pipeline) = app(Some("secret-key"));
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_x_api_key_header() {
        let (router, _pipeline) = app(Some("secret-key"));
        let request = Request::builder()
            .uri("/test")
            .header("X-API-Key", "secret-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_for(router, request).await, StatusCode::OK);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
