//! Configuration for the transcoder module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the FFmpeg-based transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Timeout for a single ffmpeg run in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Longest accepted input in seconds (0 = unlimited).
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,

    /// Inputs above this size get a higher CRF for mp4 (MiB).
    #[serde(default = "default_compress_above_mb")]
    pub compress_above_mb: u64,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Minimum interval between progress reports (milliseconds).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Lines of stderr kept for failure reports.
    #[serde(default = "default_stderr_tail")]
    pub stderr_tail_lines: usize,

    /// Additional global ffmpeg arguments.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_timeout() -> u64 {
    300
}

fn default_max_duration() -> u64 {
    1800
}

fn default_compress_above_mb() -> u64 {
    50
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_progress_interval() -> u64 {
    500
}

fn default_stderr_tail() -> usize {
    20
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            timeout_secs: default_timeout(),
            max_duration_secs: default_max_duration(),
            compress_above_mb: default_compress_above_mb(),
            ffmpeg_log_level: default_log_level(),
            progress_interval_ms: default_progress_interval(),
            stderr_tail_lines: default_stderr_tail(),
            extra_ffmpeg_args: Vec::new(),
        }
    }
}

impl TranscoderConfig {
    /// Creates a new config with custom ffmpeg/ffprobe paths.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            ..Default::default()
        }
    }

    /// Sets the timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn compress_above_bytes(&self) -> u64 {
        self.compress_above_mb * 1024 * 1024
    }
}
