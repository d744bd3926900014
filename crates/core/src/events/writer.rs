use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{EventEnvelope, EventHandle, PipelineEvent};
use crate::metrics;

/// Background task that turns pipeline events into logs and metrics.
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>) -> Self {
        Self { rx }
    }

    /// Consumes events until every handle is dropped.
    pub async fn run(mut self) {
        info!("Event writer started");
        while let Some(envelope) = self.rx.recv().await {
            record(&envelope.event);
        }
        info!("Event writer shutting down");
    }
}

fn record(event: &PipelineEvent) {
    match event {
        PipelineEvent::ServiceStarted { version } => {
            info!(version = %version, "Service started");
        }
        PipelineEvent::ServiceStopped { reason } => {
            info!(reason = %reason, "Service stopped");
        }
        PipelineEvent::JobSubmitted {
            job_id,
            host,
            format,
            requester,
        } => {
            metrics::JOBS_SUBMITTED.inc();
            info!(job_id = %job_id, host = %host, format = %format, requester = ?requester, "Job submitted");
        }
        PipelineEvent::JobStateChanged { job_id, from, to } => {
            info!(job_id = %job_id, from = %from, to = %to, "Job state changed");
        }
        PipelineEvent::JobRetrying {
            job_id,
            stage,
            attempt,
            delay_ms,
            reason,
        } => {
            metrics::JOB_RETRIES.with_label_values(&[stage.as_str()]).inc();
            warn!(job_id = %job_id, stage = %stage, attempt, delay_ms, reason = %reason, "Job retrying");
        }
        PipelineEvent::JobCompleted {
            job_id,
            cached,
            size_bytes,
            duration_ms,
        } => {
            let outcome = if *cached { "cached" } else { "done" };
            metrics::JOBS_FINISHED.with_label_values(&[outcome]).inc();
            metrics::JOB_DURATION
                .with_label_values(&[outcome])
                .observe(*duration_ms as f64 / 1000.0);
            info!(job_id = %job_id, cached, size_bytes, duration_ms, "Job completed");
        }
        PipelineEvent::JobFailed {
            job_id,
            kind,
            message,
            duration_ms,
        } => {
            metrics::JOBS_FINISHED.with_label_values(&[kind.as_str()]).inc();
            metrics::JOB_DURATION
                .with_label_values(&[kind.as_str()])
                .observe(*duration_ms as f64 / 1000.0);
            warn!(job_id = %job_id, kind = %kind, message = %message, "Job failed");
        }
        PipelineEvent::TunnelProvisioned {
            tunnel_id,
            interface,
            attempts,
        } => {
            metrics::TUNNEL_EVENTS.with_label_values(&["provisioned"]).inc();
            info!(tunnel_id = %tunnel_id, interface = %interface, attempts, "Tunnel provisioned");
        }
        PipelineEvent::TunnelUnhealthy {
            tunnel_id,
            interface,
            reason,
        } => {
            metrics::TUNNEL_EVENTS.with_label_values(&["unhealthy"]).inc();
            warn!(tunnel_id = %tunnel_id, interface = %interface, reason = %reason, "Tunnel unhealthy");
        }
        PipelineEvent::TunnelDestroyed {
            tunnel_id,
            interface,
        } => {
            metrics::TUNNEL_EVENTS.with_label_values(&["destroyed"]).inc();
            info!(tunnel_id = %tunnel_id, interface = %interface, "Tunnel destroyed");
        }
        PipelineEvent::CacheCleaned {
            removed_files,
            freed_bytes,
        } => {
            info!(removed_files, freed_bytes, "Result cache cleaned");
        }
        PipelineEvent::OperationalAlert {
            alert,
            tunnel_id,
            message,
        } => {
            metrics::OPERATIONAL_ALERTS
                .with_label_values(&[alert.as_str()])
                .inc();
            error!(alert = alert.as_str(), tunnel_id = ?tunnel_id, message = %message, "Operational alert");
        }
    }
}

/// Creates the event channel.
///
/// Returns the handle to clone into components and the writer to spawn with
/// `tokio::spawn(writer.run())`.
pub fn create_event_system(buffer_size: usize) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventHandle::new(tx), EventWriter::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AlertKind;
    use crate::tunnel::TunnelId;

    #[tokio::test]
    async fn test_writer_updates_metrics_and_stops_when_handles_drop() {
        let (handle, writer) = create_event_system(16);
        let task = tokio::spawn(writer.run());

        let before = metrics::OPERATIONAL_ALERTS
            .with_label_values(&["teardown_stuck"])
            .get();
        handle
            .emit(PipelineEvent::OperationalAlert {
                alert: AlertKind::TeardownStuck,
                tunnel_id: Some(TunnelId::from("t1")),
                message: "stuck".to_string(),
            })
            .await;
        drop(handle);

        task.await.unwrap();
        let after = metrics::OPERATIONAL_ALERTS
            .with_label_values(&["teardown_stuck"])
            .get();
        assert!(after > before);
    }
}
