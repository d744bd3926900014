//! Error types for the transcoder module.

use std::path::PathBuf;
use thiserror::Error;

use crate::scheduler::JobErrorKind;

/// Errors that can occur while transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// FFprobe binary not found.
    #[error("FFprobe not found at path: {path}")]
    FfprobeNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The input can not produce the requested format.
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// The input runs longer than allowed.
    #[error("Media is {duration_secs:.0}s long, limit is {max_secs}s")]
    TooLong { duration_secs: f64, max_secs: u64 },

    /// FFmpeg exited unsuccessfully or produced nothing.
    #[error("FFmpeg failed ({}): {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ProcessFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// FFmpeg ran past its timeout and was killed.
    #[error("Transcode timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// ffprobe ran but could not read the file.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// The job was cancelled and ffmpeg killed.
    #[error("Transcode cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn process_failure(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::ProcessFailure {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::UnsupportedFormat { .. } | Self::ProbeFailed { .. } => {
                JobErrorKind::UnsupportedFormat
            }
            Self::TooLong { .. } => JobErrorKind::SizeExceeded,
            Self::Timeout { .. } => JobErrorKind::Timeout,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::ProcessFailure { .. } | Self::FfmpegNotFound { .. } => {
                JobErrorKind::ProcessFailure
            }
            Self::FfprobeNotFound { .. } | Self::InputNotFound { .. } | Self::Io(_) => {
                JobErrorKind::Internal
            }
        }
    }
}
