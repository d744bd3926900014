//! Trait definitions for the fetch module.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;
use super::types::{Blob, FetchJob, FetchProgress};
use crate::tunnel::TunnelLease;

/// Downloads remote media through a leased tunnel.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Streams `job.url` into `job.dest` through `lease`.
    ///
    /// The lease is only borrowed for the duration of the call. On any error
    /// the partial file is removed.
    async fn fetch(
        &self,
        lease: &TunnelLease,
        job: &FetchJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<Blob, FetchError>;
}
