//! Job model shared by the scheduler, the events channel and the API.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transcoder::OutputFormat;
use crate::tunnel::TunnelId;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle.
///
/// `Queued → TunnelAcquired → Fetching → Transcoding → Done`, with `Failed`
/// reachable from every non-terminal state. A retried acquire or fetch moves
/// the job back to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    TunnelAcquired,
    Fetching,
    Transcoding,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::TunnelAcquired => "tunnel_acquired",
            JobStatus::Fetching => "fetching",
            JobStatus::Transcoding => "transcoding",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    PoolExhausted,
    TunnelUnavailable,
    TunnelFault,
    RemoteError,
    SizeExceeded,
    Timeout,
    UnsupportedFormat,
    ProcessFailure,
    PermissionDenied,
    /// Tunnel acquisition kept failing for lack of capacity.
    NoCapacity,
    Cancelled,
    /// Local failure (filesystem, task panic).
    Internal,
}

impl JobErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorKind::PoolExhausted => "pool_exhausted",
            JobErrorKind::TunnelUnavailable => "tunnel_unavailable",
            JobErrorKind::TunnelFault => "tunnel_fault",
            JobErrorKind::RemoteError => "remote_error",
            JobErrorKind::SizeExceeded => "size_exceeded",
            JobErrorKind::Timeout => "timeout",
            JobErrorKind::UnsupportedFormat => "unsupported_format",
            JobErrorKind::ProcessFailure => "process_failure",
            JobErrorKind::PermissionDenied => "permission_denied",
            JobErrorKind::NoCapacity => "no_capacity",
            JobErrorKind::Cancelled => "cancelled",
            JobErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A request to fetch and transcode one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub url: String,
    /// Output format name, e.g. `mp4` or `mp3`.
    pub format: String,
    /// Maximum video height.
    #[serde(default)]
    pub quality: Option<u32>,
    /// Opaque id of whoever asked (a chat user id).
    #[serde(default)]
    pub requester: Option<String>,
}

impl JobRequest {
    pub fn new(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: format.into(),
            quality: None,
            requester: None,
        }
    }

    pub fn with_quality(mut self, height: u32) -> Self {
        self.quality = Some(height);
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// Where a finished job's artifact lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Served from the result cache without fetching.
    pub cached: bool,
}

/// Progress of the running stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum JobProgress {
    Fetching {
        bytes: u64,
        total: Option<u64>,
    },
    Transcoding {
        percent: f32,
        speed: Option<f32>,
    },
}

/// Read-only view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub url: String,
    pub format: OutputFormat,
    pub quality: Option<u32>,
    pub requester: Option<String>,
    pub status: JobStatus,
    pub history: Vec<StatusChange>,
    pub acquire_attempts: u32,
    pub fetch_attempts: u32,
    /// Tunnel currently leased by the job.
    pub tunnel: Option<TunnelId>,
    pub progress: Option<JobProgress>,
    pub result: Option<JobResult>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Statuses in the order they were entered.
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.history.iter().map(|change| change.status).collect()
    }
}

/// Broadcast to subscribers whenever a job changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    Status {
        job_id: JobId,
        status: JobStatus,
        failure: Option<JobFailure>,
    },
    Progress {
        job_id: JobId,
        progress: JobProgress,
    },
}

impl JobUpdate {
    pub fn job_id(&self) -> JobId {
        match self {
            JobUpdate::Status { job_id, .. } | JobUpdate::Progress { job_id, .. } => *job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parse_round_trip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Fetching.is_terminal());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: JobRequest =
            serde_json::from_str(r#"{"url": "https://example.test/v.mp4", "format": "mp4"}"#)
                .unwrap();
        assert_eq!(request.format, "mp4");
        assert!(request.quality.is_none());
        assert!(request.requester.is_none());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let failure = JobFailure::new(JobErrorKind::NoCapacity, "no tunnel free");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "no_capacity");
        assert_eq!(failure.to_string(), "no_capacity: no tunnel free");
    }

    #[test]
    fn test_progress_tagged_by_stage() {
        let update = JobUpdate::Progress {
            job_id: JobId::new(),
            progress: JobProgress::Fetching {
                bytes: 10,
                total: Some(100),
            },
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["progress"]["stage"], "fetching");
    }
}
