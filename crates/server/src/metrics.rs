//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the burrow server:
//! - HTTP request metrics (latency, counts, auth failures)
//! - Job and tunnel pool gauges (collected dynamically)
//! - Result cache size (collected dynamically)
//!
//! Core pipeline counters are registered alongside from `burrow_core::metrics`.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use burrow_core::tunnel::TunnelState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "burrow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "burrow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_auth_failures_total", "Total authentication failures"),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Scheduler Metrics (collected dynamically)
// =============================================================================

/// Scheduler running state (1 = running, 0 = stopped).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "burrow_scheduler_running",
        "Whether the job scheduler is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Jobs currently tracked, by coarse status.
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("burrow_jobs_by_status", "Current job count by status"),
        &["status"], // "queued", "active", "done", "failed"
    )
    .unwrap()
});

// =============================================================================
// Tunnel Pool Metrics (collected dynamically)
// =============================================================================

/// Pool slots by lifecycle state.
pub static TUNNELS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("burrow_tunnels_by_state", "Tunnel slots by lifecycle state"),
        &["state"],
    )
    .unwrap()
});

/// Tunnels currently leased to a job.
pub static TUNNELS_LEASED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("burrow_tunnels_leased", "Tunnels currently held by a job").unwrap()
});

// =============================================================================
// Cache Metrics (collected dynamically)
// =============================================================================

pub static CACHE_FILES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("burrow_cache_files", "Artifacts in the result cache").unwrap()
});

pub static CACHE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("burrow_cache_bytes", "Total size of the result cache in bytes").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Scheduler
    registry
        .register(Box::new(SCHEDULER_RUNNING.clone()))
        .unwrap();
    registry.register(Box::new(JOBS_BY_STATUS.clone())).unwrap();

    // Tunnels
    registry
        .register(Box::new(TUNNELS_BY_STATE.clone()))
        .unwrap();
    registry.register(Box::new(TUNNELS_LEASED.clone())).unwrap();

    // Cache
    registry.register(Box::new(CACHE_FILES.clone())).unwrap();
    registry.register(Box::new(CACHE_BYTES.clone())).unwrap();

    // Core metrics (jobs, tunnels, stages, cache)
    for metric in burrow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the scheduler, tunnel pool and
/// cache at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let summary = state.scheduler().summary();
    SCHEDULER_RUNNING.set(i64::from(summary.running));
    JOBS_BY_STATUS
        .with_label_values(&["queued"])
        .set(summary.queued as i64);
    JOBS_BY_STATUS
        .with_label_values(&["active"])
        .set(summary.active as i64);
    JOBS_BY_STATUS
        .with_label_values(&["done"])
        .set(summary.done as i64);
    JOBS_BY_STATUS
        .with_label_values(&["failed"])
        .set(summary.failed as i64);

    let pool = state.tunnels().status();
    for tunnel_state in [
        TunnelState::Provisioning,
        TunnelState::Active,
        TunnelState::Draining,
        TunnelState::Destroyed,
    ] {
        TUNNELS_BY_STATE
            .with_label_values(&[tunnel_state.as_str()])
            .set(pool.count_in(tunnel_state) as i64);
    }
    TUNNELS_LEASED.set(pool.leased() as i64);

    if let Ok(stats) = state.cache().stats().await {
        CACHE_FILES.set(stats.files as i64);
        CACHE_BYTES.set(stats.total_bytes as i64);
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
