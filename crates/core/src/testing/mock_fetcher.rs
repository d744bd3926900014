//! Mock fetcher for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::fetch::{Blob, FetchError, FetchJob, FetchProgress, Fetcher};
use crate::tunnel::{TunnelId, TunnelLease};

/// A recorded fetch for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    pub job_id: String,
    pub url: String,
    /// Tunnel the fetch ran through.
    pub tunnel: TunnelId,
    pub interface: String,
}

/// Mock implementation of the Fetcher trait.
///
/// Provides controllable behavior for testing:
/// - Track fetches and the tunnel each one used
/// - Queue errors returned by the next fetches, in order
/// - Simulate slow transfers that honor cancellation
///
/// Successful fetches write the configured body to `job.dest`.
#[derive(Debug)]
pub struct MockFetcher {
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    queued_errors: Arc<RwLock<VecDeque<FetchError>>>,
    body: Arc<RwLock<Vec<u8>>>,
    delay: Arc<RwLock<Duration>>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            fetches: Arc::new(RwLock::new(Vec::new())),
            queued_errors: Arc::new(RwLock::new(VecDeque::new())),
            body: Arc::new(RwLock::new(b"mock media body".to_vec())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.fetches.read().await.len()
    }

    /// The next fetch fails with `error`. Queued errors are used in order.
    pub async fn queue_error(&self, error: FetchError) {
        self.queued_errors.write().await.push_back(error);
    }

    pub async fn set_body(&self, body: impl Into<Vec<u8>>) {
        *self.body.write().await = body.into();
    }

    /// Simulated transfer time.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        lease: &TunnelLease,
        job: &FetchJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<Blob, FetchError> {
        self.fetches.write().await.push(RecordedFetch {
            job_id: job.job_id.clone(),
            url: job.url.clone(),
            tunnel: lease.id().clone(),
            interface: lease.interface().to_string(),
        });

        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        if let Some(error) = self.queued_errors.write().await.pop_front() {
            return Err(error);
        }

        let body = self.body.read().await.clone();
        let size = body.len() as u64;
        if size > job.limits.max_bytes {
            return Err(FetchError::SizeExceeded {
                limit_bytes: job.limits.max_bytes,
            });
        }
        tokio::fs::write(&job.dest, &body).await?;

        if let Some(tx) = progress {
            let _ = tx.try_send(FetchProgress {
                bytes: size,
                total: Some(size),
            });
        }

        Ok(Blob {
            path: job.dest.clone(),
            size_bytes: size,
            content_type: Some("video/mp4".to_string()),
            duration_ms: delay.as_millis() as u64,
        })
    }
}
