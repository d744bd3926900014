//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use burrow_core::{JobId, JobRequest, JobSnapshot, JobStatus, SubmitError};

use crate::state::AppState;

/// Maximum allowed limit for job listings
const MAX_LIMIT: usize = 1000;

/// Default limit for job listings
const DEFAULT_LIMIT: usize = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status, e.g. `fetching` or `failed`
    pub status: Option<JobStatus>,
    /// Filter by requester id
    pub requester: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
    /// Machine-readable reason, matching the failure kinds of finished jobs.
    pub kind: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job. Answers `202 Accepted` with the job snapshot; a job
/// served from the result cache is already `done`.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobSnapshot>), Response> {
    let id = state
        .scheduler()
        .submit(request)
        .await
        .map_err(submit_error_response)?;

    match state.scheduler().status(&id) {
        Some(job) => Ok((StatusCode::ACCEPTED, Json(job))),
        None => Err(not_found(&id.to_string())),
    }
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, Response> {
    let job_id = parse_job_id(&id)?;
    state
        .scheduler()
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

/// List tracked jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Json<ListJobsResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut jobs: Vec<JobSnapshot> = state
        .scheduler()
        .list()
        .into_iter()
        .filter(|job| params.status.is_none_or(|status| job.status == status))
        .filter(|job| {
            params
                .requester
                .as_ref()
                .is_none_or(|requester| job.requester.as_ref() == Some(requester))
        })
        .collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = jobs.len();
    jobs.truncate(limit);

    Json(ListJobsResponse { jobs, total })
}

/// Cancel a job (DELETE endpoint). Answers with the job as it stands after
/// cancellation was requested; a running job reaches `failed` shortly after.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, Response> {
    let job_id = parse_job_id(&id)?;
    state
        .scheduler()
        .cancel(&job_id)
        .await
        .map_err(submit_error_response)?;

    debug!(job_id = %job_id, "Cancellation requested over API");
    state
        .scheduler()
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

// ============================================================================
// Error mapping
// ============================================================================

fn parse_job_id(id: &str) -> Result<JobId, Response> {
    id.parse().map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid job id: {}", id),
            "invalid_request",
        )
    })
}

fn not_found(id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Job not found: {}", id),
        "not_found",
    )
}

fn error_response(status: StatusCode, error: String, kind: &str) -> Response {
    (
        status,
        Json(JobErrorResponse {
            error,
            kind: kind.to_string(),
        }),
    )
        .into_response()
}

/// Maps a refused submission or cancellation onto an HTTP status.
pub fn submit_error_response(err: SubmitError) -> Response {
    let status = match &err {
        SubmitError::InvalidUrl(_)
        | SubmitError::UnsupportedFormat(_)
        | SubmitError::InvalidQuality { .. } => StatusCode::BAD_REQUEST,
        SubmitError::Forbidden(_) => StatusCode::FORBIDDEN,
        SubmitError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
        SubmitError::QueueFull | SubmitError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        SubmitError::NotFound(_) => StatusCode::NOT_FOUND,
        SubmitError::AlreadyFinished(_) => StatusCode::CONFLICT,
    };
    let kind = match &err {
        SubmitError::InvalidUrl(_) | SubmitError::InvalidQuality { .. } => "invalid_request",
        SubmitError::Throttled { .. } => "throttled",
        SubmitError::NotFound(_) => "not_found",
        SubmitError::AlreadyFinished(_) => "already_finished",
        other => other.kind().as_str(),
    };

    let mut response = error_response(status, err.to_string(), kind);
    if let SubmitError::Throttled { retry_after_secs } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
