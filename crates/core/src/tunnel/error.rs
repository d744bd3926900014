use std::path::PathBuf;
use thiserror::Error;

use crate::scheduler::JobErrorKind;

/// Failure of a privileged host operation.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("Permission denied running '{command}': {stderr}")]
    PermissionDenied { command: String, stderr: String },

    #[error("Command '{command}' failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Binary not found: {program}")]
    BinaryNotFound { program: String },

    #[error("Command '{command}' timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Probe via {interface} to {target} failed: {reason}")]
    ProbeFailed {
        interface: String,
        target: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

/// stderr fragments printed by ip/iptables when the object to delete is gone.
const ABSENT_MARKERS: &[&str] = &[
    "Cannot find device",
    "No such file or directory",
    "No such process",
    "No such device",
    "does a matching rule exist",
    "Cannot assign requested address",
    "Bad rule",
];

impl HostError {
    /// Builds the error for a command that exited unsuccessfully.
    pub fn from_failure(command: String, exit_code: Option<i32>, stderr: String) -> Self {
        if is_permission_message(&stderr) {
            HostError::PermissionDenied { command, stderr }
        } else {
            HostError::CommandFailed {
                command,
                exit_code,
                stderr,
            }
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, HostError::PermissionDenied { .. })
    }

    /// True when a delete failed because the object no longer exists.
    pub fn is_absent(&self) -> bool {
        match self {
            HostError::CommandFailed { stderr, .. } => {
                ABSENT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}

pub(crate) fn is_permission_message(stderr: &str) -> bool {
    stderr.contains("Operation not permitted")
        || stderr.contains("Permission denied")
        || stderr.contains("must be root")
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::Io(e.to_string())
    }
}

/// Errors loading tunnel configurations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid tunnel configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the tunnel manager.
#[derive(Debug, Clone, Error)]
pub enum TunnelError {
    #[error("No tunnel became available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Tunnel provisioning did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tunnel unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Permission denied configuring tunnel: {0}")]
    PermissionDenied(String),

    #[error("Tunnel manager is shutting down")]
    ShuttingDown,
}

impl TunnelError {
    /// Capacity errors are worth retrying later; the rest are not.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            TunnelError::PoolExhausted { .. } | TunnelError::Timeout { .. }
        )
    }

    pub fn kind(&self) -> JobErrorKind {
        match self {
            TunnelError::PoolExhausted { .. } => JobErrorKind::PoolExhausted,
            TunnelError::Timeout { .. } => JobErrorKind::Timeout,
            TunnelError::Unavailable { .. } => JobErrorKind::TunnelUnavailable,
            TunnelError::PermissionDenied(_) => JobErrorKind::PermissionDenied,
            TunnelError::ShuttingDown => JobErrorKind::Cancelled,
        }
    }
}

impl From<HostError> for TunnelError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::PermissionDenied { .. } => TunnelError::PermissionDenied(e.to_string()),
            other => TunnelError::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_detection() {
        let err = HostError::from_failure(
            "ip link add dev bw0 type wireguard".to_string(),
            Some(2),
            "RTNETLINK answers: Operation not permitted".to_string(),
        );
        assert!(err.is_permission_denied());

        let err = HostError::from_failure(
            "iptables -A OUTPUT".to_string(),
            Some(4),
            "iptables v1.8.9 (nf_tables): Could not fetch rule set generation id: Permission denied (you must be root)".to_string(),
        );
        assert!(err.is_permission_denied());
        assert!(matches!(
            TunnelError::from(err),
            TunnelError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_absent_detection() {
        let err = HostError::from_failure(
            "ip link del dev bw0".to_string(),
            Some(1),
            "Cannot find device \"bw0\"".to_string(),
        );
        assert!(err.is_absent());

        let err = HostError::from_failure(
            "iptables -D OUTPUT".to_string(),
            Some(1),
            "iptables: Bad rule (does a matching rule exist in that chain?).".to_string(),
        );
        assert!(err.is_absent());

        let err = HostError::from_failure(
            "ip route add".to_string(),
            Some(2),
            "RTNETLINK answers: File exists".to_string(),
        );
        assert!(!err.is_absent());
    }

    #[test]
    fn test_capacity_errors() {
        assert!(TunnelError::PoolExhausted { waited_ms: 0 }.is_capacity());
        assert!(TunnelError::Timeout { timeout_ms: 10 }.is_capacity());
        assert!(!TunnelError::PermissionDenied("x".into()).is_capacity());
        assert_eq!(
            TunnelError::Unavailable {
                reason: "x".into()
            }
            .kind(),
            JobErrorKind::TunnelUnavailable
        );
    }
}
