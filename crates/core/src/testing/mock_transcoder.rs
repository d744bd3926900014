//! Mock transcoder for testing.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::transcoder::{
    Artifact, MediaInfo, TranscodeError, TranscodeJob, TranscodeProgress, Transcoder,
};

/// Mock implementation of the Transcoder trait.
///
/// Provides controllable behavior for testing:
/// - Track transcode jobs for assertions
/// - Simulate failure of the next run
/// - Simulate long runs that honor cancellation
///
/// Successful runs copy the input to `job.output_path`.
#[derive(Debug)]
pub struct MockTranscoder {
    jobs: Arc<RwLock<Vec<TranscodeJob>>>,
    next_error: Arc<RwLock<Option<TranscodeError>>>,
    duration: Arc<RwLock<Duration>>,
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            duration: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    pub async fn recorded_jobs(&self) -> Vec<TranscodeJob> {
        self.jobs.read().await.clone()
    }

    /// Configure the next run to fail with the given error.
    pub async fn set_next_error(&self, error: TranscodeError) {
        *self.next_error.write().await = Some(error);
    }

    /// Simulated run time.
    pub async fn set_duration(&self, duration: Duration) {
        *self.duration.write().await = duration;
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|_| TranscodeError::InputNotFound {
                path: path.to_path_buf(),
            })?
            .len();
        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs: 60.0,
            container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
            audio_codec: Some("aac".to_string()),
            video_codec: Some("h264".to_string()),
            video_width: Some(1920),
            video_height: Some(1080),
        })
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<TranscodeProgress>>,
    ) -> Result<Artifact, TranscodeError> {
        self.jobs.write().await.push(job.clone());

        let duration = *self.duration.read().await;
        if !duration.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
                _ = tokio::time::sleep(duration) => {}
            }
        }

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        if !job.input_path.exists() {
            return Err(TranscodeError::InputNotFound {
                path: job.input_path.clone(),
            });
        }
        let size_bytes = tokio::fs::copy(&job.input_path, &job.output_path).await?;

        if let Some(tx) = progress {
            let _ = tx.try_send(TranscodeProgress {
                job_id: job.job_id.clone(),
                percent: 100.0,
                time_secs: 60.0,
                duration_secs: Some(60.0),
                speed: Some(1.0),
            });
        }

        Ok(Artifact {
            path: job.output_path.clone(),
            size_bytes,
            format: job.format,
            duration_ms: duration.as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        Ok(())
    }
}
