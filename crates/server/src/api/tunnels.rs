//! Tunnel pool API handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use burrow_core::tunnel::PoolStatus;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    /// Number of tunnel configurations now available.
    pub configured: usize,
}

#[derive(Debug, Serialize)]
pub struct TunnelErrorResponse {
    pub error: String,
}

/// Snapshot of every pool slot.
pub async fn get_pool(State(state): State<Arc<AppState>>) -> Json<PoolStatus> {
    Json(state.tunnels().status())
}

/// Re-read peer configurations. Installed tunnels keep running on the
/// configuration they were provisioned with.
pub async fn reload(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<TunnelErrorResponse>)> {
    match state.tunnels().reload_configs() {
        Ok(configured) => {
            info!(configured, "Tunnel configurations reloaded");
            Ok(Json(ReloadResponse { configured }))
        }
        Err(e) => {
            warn!(error = %e, "Tunnel configuration reload rejected");
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(TunnelErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
