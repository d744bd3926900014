use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::PipelineEvent;

/// Event plus the moment it was emitted.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: PipelineEvent,
}

/// Cloneable sender side of the event channel.
///
/// Emitting never fails the caller: a full or closed channel is logged and
/// the event is dropped.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
}

impl EventHandle {
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: PipelineEvent) {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit pipeline event: {}", e);
        }
    }

    /// Non-blocking emit, usable from synchronous code such as `Drop`.
    pub fn try_emit(&self, event: PipelineEvent) -> bool {
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Dropped pipeline event: {}", e);
                false
            }
        }
    }
}
