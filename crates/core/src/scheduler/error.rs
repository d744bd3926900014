use thiserror::Error;

use super::types::{JobErrorKind, JobId};

/// Why a submission or cancellation was refused.
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Quality {quality} is not one of {allowed:?}")]
    InvalidQuality { quality: u32, allowed: Vec<u32> },

    #[error("Requester '{0}' is not allowed to submit jobs")]
    Forbidden(String),

    #[error("Too many submissions, retry in {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("Job queue is full")]
    QueueFull,

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {0} already finished")]
    AlreadyFinished(JobId),
}

impl SubmitError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            SubmitError::UnsupportedFormat(_) => JobErrorKind::UnsupportedFormat,
            SubmitError::QueueFull => JobErrorKind::NoCapacity,
            SubmitError::ShuttingDown => JobErrorKind::Cancelled,
            SubmitError::Forbidden(_) => JobErrorKind::PermissionDenied,
            _ => JobErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SubmitError::UnsupportedFormat("avi".into()).kind(),
            JobErrorKind::UnsupportedFormat
        );
        assert_eq!(SubmitError::QueueFull.kind(), JobErrorKind::NoCapacity);
        assert_eq!(
            SubmitError::Forbidden("mallory".into()).kind(),
            JobErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_display() {
        let err = SubmitError::InvalidQuality {
            quality: 480,
            allowed: vec![720, 1080],
        };
        assert_eq!(err.to_string(), "Quality 480 is not one of [720, 1080]");
    }
}
