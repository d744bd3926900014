use serde::{Deserialize, Serialize};

use crate::scheduler::{JobErrorKind, JobId, JobStatus};
use crate::tunnel::TunnelId;

/// Conditions an operator has to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A draining tunnel could not be torn down before its deadline.
    TeardownStuck,
    /// Every provisioning attempt for a tunnel failed.
    ProvisioningExhausted,
    /// The process lacks the privileges to manage host networking.
    PermissionDenied,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TeardownStuck => "teardown_stuck",
            AlertKind::ProvisioningExhausted => "provisioning_exhausted",
            AlertKind::PermissionDenied => "permission_denied",
        }
    }
}

/// Everything the pipeline reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ServiceStarted {
        version: String,
    },
    ServiceStopped {
        reason: String,
    },

    JobSubmitted {
        job_id: JobId,
        host: String,
        format: String,
        requester: Option<String>,
    },
    JobStateChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    JobRetrying {
        job_id: JobId,
        stage: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    JobCompleted {
        job_id: JobId,
        cached: bool,
        size_bytes: u64,
        duration_ms: u64,
    },
    JobFailed {
        job_id: JobId,
        kind: JobErrorKind,
        message: String,
        duration_ms: u64,
    },

    TunnelProvisioned {
        tunnel_id: TunnelId,
        interface: String,
        attempts: u32,
    },
    TunnelUnhealthy {
        tunnel_id: TunnelId,
        interface: String,
        reason: String,
    },
    TunnelDestroyed {
        tunnel_id: TunnelId,
        interface: String,
    },

    CacheCleaned {
        removed_files: usize,
        freed_bytes: u64,
    },

    OperationalAlert {
        alert: AlertKind,
        tunnel_id: Option<TunnelId>,
        message: String,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::ServiceStarted { .. } => "service_started",
            PipelineEvent::ServiceStopped { .. } => "service_stopped",
            PipelineEvent::JobSubmitted { .. } => "job_submitted",
            PipelineEvent::JobStateChanged { .. } => "job_state_changed",
            PipelineEvent::JobRetrying { .. } => "job_retrying",
            PipelineEvent::JobCompleted { .. } => "job_completed",
            PipelineEvent::JobFailed { .. } => "job_failed",
            PipelineEvent::TunnelProvisioned { .. } => "tunnel_provisioned",
            PipelineEvent::TunnelUnhealthy { .. } => "tunnel_unhealthy",
            PipelineEvent::TunnelDestroyed { .. } => "tunnel_destroyed",
            PipelineEvent::CacheCleaned { .. } => "cache_cleaned",
            PipelineEvent::OperationalAlert { .. } => "operational_alert",
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            PipelineEvent::JobSubmitted { job_id, .. }
            | PipelineEvent::JobStateChanged { job_id, .. }
            | PipelineEvent::JobRetrying { job_id, .. }
            | PipelineEvent::JobCompleted { job_id, .. }
            | PipelineEvent::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn tunnel_id(&self) -> Option<&TunnelId> {
        match self {
            PipelineEvent::TunnelProvisioned { tunnel_id, .. }
            | PipelineEvent::TunnelUnhealthy { tunnel_id, .. }
            | PipelineEvent::TunnelDestroyed { tunnel_id, .. } => Some(tunnel_id),
            PipelineEvent::OperationalAlert { tunnel_id, .. } => tunnel_id.as_ref(),
            _ => None,
        }
    }
}
