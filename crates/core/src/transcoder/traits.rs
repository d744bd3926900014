//! Trait definitions for the transcoder module.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::TranscodeError;
use super::types::{Artifact, MediaInfo, TranscodeJob, TranscodeProgress};

/// Turns a downloaded blob into the requested output format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Probes a media file to get its information.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;

    /// Runs one transcode.
    ///
    /// Cancelling `cancel` stops the run; the subprocess is killed and reaped
    /// before this returns. Progress is sent with `try_send`, a full or closed
    /// channel does not slow the run down.
    async fn transcode(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<TranscodeProgress>>,
    ) -> Result<Artifact, TranscodeError>;

    /// Validates that the transcoder is properly configured and ready.
    async fn validate(&self) -> Result<(), TranscodeError>;
}
