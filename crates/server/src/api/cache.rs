//! Result cache API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use burrow_core::{cache::CleanupReport, CacheStats};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CacheErrorResponse {
    pub error: String,
}

type CacheResult<T> = Result<Json<T>, (StatusCode, Json<CacheErrorResponse>)>;

/// Get cache statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> CacheResult<CacheStats> {
    state.cache().stats().await.map(Json).map_err(internal)
}

/// Run eviction now instead of waiting for the janitor
pub async fn cleanup(State(state): State<Arc<AppState>>) -> CacheResult<CleanupReport> {
    state.cache().cleanup().await.map(Json).map_err(internal)
}

fn internal(e: burrow_core::CacheError) -> (StatusCode, Json<CacheErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(CacheErrorResponse {
            error: e.to_string(),
        }),
    )
}
