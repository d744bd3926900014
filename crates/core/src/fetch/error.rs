//! Error types for the fetch module.

use thiserror::Error;

use crate::scheduler::JobErrorKind;

/// Errors that can occur while downloading through a tunnel.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL can not be requested.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection-level failure; the tunnel itself is suspect.
    #[error("Tunnel fault: {reason}")]
    TunnelFault { reason: String },

    /// The tunnel works but the server said no.
    #[error("Remote error{}: {reason}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Remote { status: Option<u16>, reason: String },

    /// The body is larger than allowed.
    #[error("Download exceeds {limit_bytes} bytes")]
    SizeExceeded { limit_bytes: u64 },

    #[error("Download timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("Download cancelled")]
    Cancelled,

    /// Writing the body to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn tunnel_fault(reason: impl Into<String>) -> Self {
        Self::TunnelFault {
            reason: reason.into(),
        }
    }

    pub fn remote(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Remote {
            status,
            reason: reason.into(),
        }
    }

    /// Whether the tunnel should be retired after this error.
    pub fn blames_tunnel(&self) -> bool {
        matches!(self, Self::TunnelFault { .. })
    }

    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TunnelFault { .. } | Self::Timeout { .. } => true,
            Self::Remote {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::TunnelFault { .. } => JobErrorKind::TunnelFault,
            Self::Remote { .. } => JobErrorKind::RemoteError,
            Self::SizeExceeded { .. } => JobErrorKind::SizeExceeded,
            Self::Timeout { .. } => JobErrorKind::Timeout,
            Self::Cancelled => JobErrorKind::Cancelled,
            Self::InvalidUrl(_) | Self::Io(_) => JobErrorKind::Internal,
        }
    }
}
