use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use burrow_core::{scheduler::SchedulerStatus, SanitizedConfig};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub jobs: SchedulerStatus,
    pub tunnels_active: usize,
    pub tunnels_leased: usize,
}

/// Liveness plus a one-line view of the pipeline. Reports `degraded` when
/// the scheduler or the tunnel pool is not running.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let jobs = state.scheduler().summary();
    let pool = state.tunnels().status();

    let status = if jobs.running && pool.running {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tunnels_active: pool.count_in(burrow_core::tunnel::TunnelState::Active),
        tunnels_leased: pool.leased(),
        jobs,
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
