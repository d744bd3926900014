//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Jobs (submissions, outcomes, retries, durations)
//! - Tunnels (provisioning, faults, teardowns, alerts)
//! - Fetch and transcode stages
//! - Result cache cleanup

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs submitted total.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("burrow_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Finished jobs by outcome.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_jobs_finished_total", "Total jobs that reached a terminal state"),
        &["outcome"], // "done", "cached", or an error kind
    )
    .unwrap()
});

/// Job duration in seconds, submit to terminal state.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("burrow_job_duration_seconds", "Duration of jobs")
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["outcome"],
    )
    .unwrap()
});

/// Retry attempts by stage.
pub static JOB_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_job_retries_total", "Total job retry attempts"),
        &["stage"], // "acquire", "fetch"
    )
    .unwrap()
});

// =============================================================================
// Tunnels
// =============================================================================

/// Tunnel lifecycle events.
pub static TUNNEL_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_tunnel_events_total", "Tunnel lifecycle events"),
        &["event"], // "provisioned", "unhealthy", "destroyed"
    )
    .unwrap()
});

/// Operational alerts raised.
pub static OPERATIONAL_ALERTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_operational_alerts_total", "Operational alerts raised"),
        &["alert"],
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Bytes fetched through tunnels.
pub static FETCH_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("burrow_fetch_bytes_total", "Total bytes fetched through tunnels").unwrap()
});

/// Fetch outcomes.
pub static FETCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("burrow_fetches_total", "Total fetch attempts"),
        &["result"], // "success" or an error kind
    )
    .unwrap()
});

/// Transcode duration in seconds.
pub static TRANSCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("burrow_transcode_duration_seconds", "Duration of ffmpeg runs")
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["format", "result"],
    )
    .unwrap()
});

// =============================================================================
// Cache
// =============================================================================

/// Files evicted from the result cache.
pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("burrow_cache_evictions_total", "Files removed by cache cleanup").unwrap()
});

/// Submissions answered from the cache.
pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("burrow_cache_hits_total", "Submissions served from the result cache").unwrap()
});

/// All core metrics, for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(JOB_RETRIES.clone()),
        // Tunnels
        Box::new(TUNNEL_EVENTS.clone()),
        Box::new(OPERATIONAL_ALERTS.clone()),
        // Stages
        Box::new(FETCH_BYTES.clone()),
        Box::new(FETCHES_TOTAL.clone()),
        Box::new(TRANSCODE_DURATION.clone()),
        // Cache
        Box::new(CACHE_EVICTIONS.clone()),
        Box::new(CACHE_HITS.clone()),
    ]
}
