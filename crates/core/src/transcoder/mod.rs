//! Transcoder module: turns a fetched blob into the requested output.
//!
//! `ffmpeg` runs as a scoped subprocess: it is killed and reaped on timeout
//! and on cancellation, its stderr tail is kept for failure reports, and the
//! per-job [`JobWorkspace`] holding input and output is removed on drop.
//!
//! # Example
//!
//! ```ignore
//! use burrow_core::transcoder::{FfmpegTranscoder, OutputFormat, TranscodeJob, Transcoder};
//!
//! let transcoder = FfmpegTranscoder::with_defaults();
//! transcoder.validate().await?;
//!
//! let job = TranscodeJob {
//!     job_id: "job-1".to_string(),
//!     input_path: workspace.download_path(),
//!     output_path: workspace.output_path(OutputFormat::Mp3),
//!     format: OutputFormat::Mp3,
//!     max_height: None,
//! };
//! let artifact = transcoder.transcode(&job, &cancel, None).await?;
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;
mod workspace;

pub use config::TranscoderConfig;
pub use error::TranscodeError;
pub use ffmpeg::FfmpegTranscoder;
pub use traits::Transcoder;
pub use types::{Artifact, MediaInfo, OutputFormat, TranscodeJob, TranscodeProgress};
pub use workspace::JobWorkspace;
