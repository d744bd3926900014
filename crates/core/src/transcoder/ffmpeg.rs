//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::TranscoderConfig;
use super::error::TranscodeError;
use super::traits::Transcoder;
use super::types::{Artifact, MediaInfo, OutputFormat, TranscodeJob, TranscodeProgress};
use crate::metrics;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// FFmpeg-based transcoder implementation.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

enum RunOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl FfmpegTranscoder {
    /// Creates a new FFmpeg transcoder with the given configuration.
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Creates a transcoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TranscoderConfig::default())
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Builds the ffmpeg argument vector. Paths are passed as single
    /// arguments, nothing goes through a shell.
    fn build_args(&self, job: &TranscodeJob, input_size: u64) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
        ];

        let codec_args: Vec<String> = match job.format {
            OutputFormat::Mp4 => {
                // Large inputs are compressed harder.
                let crf = if input_size > self.config.compress_above_bytes() {
                    28
                } else {
                    23
                };
                vec![
                    "-c:v".into(),
                    "libx264".into(),
                    "-preset".into(),
                    "fast".into(),
                    "-crf".into(),
                    crf.to_string(),
                    "-c:a".into(),
                    "aac".into(),
                    "-b:a".into(),
                    "128k".into(),
                    "-movflags".into(),
                    "+faststart".into(),
                    "-vf".into(),
                    scale_filter(job.max_height),
                ]
            }
            OutputFormat::Webm => vec![
                "-c:v".into(),
                "libvpx-vp9".into(),
                "-crf".into(),
                "32".into(),
                "-b:v".into(),
                "0".into(),
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                "128k".into(),
                "-vf".into(),
                scale_filter(job.max_height),
            ],
            OutputFormat::Mkv => vec!["-map".into(), "0".into(), "-c".into(), "copy".into()],
            OutputFormat::Mp3 => audio_args("libmp3lame", "320k"),
            OutputFormat::M4a => audio_args("aac", "256k"),
            OutputFormat::Opus => audio_args("libopus", "160k"),
        };
        args.extend(codec_args);

        // Progress output for parsing
        args.extend([
            "-progress".to_string(),
            "pipe:2".to_string(),
            "-nostats".to_string(),
        ]);

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output_path.to_string_lossy().to_string());

        args
    }

    /// Rejects inputs that can not produce the requested output.
    fn check_input(&self, format: OutputFormat, info: &MediaInfo) -> Result<(), TranscodeError> {
        let max = self.config.max_duration_secs;
        if max > 0 && info.duration_secs > max as f64 {
            return Err(TranscodeError::TooLong {
                duration_secs: info.duration_secs,
                max_secs: max,
            });
        }

        if format.is_audio_only() && !info.has_audio() {
            return Err(TranscodeError::unsupported(format!(
                "{} needs an audio stream, input has none",
                format
            )));
        }
        if format.supports_scaling() && !info.has_video() {
            return Err(TranscodeError::unsupported(format!(
                "{} needs a video stream, input has none",
                format
            )));
        }
        if !info.has_audio() && !info.has_video() {
            return Err(TranscodeError::unsupported("input has no media streams"));
        }
        Ok(())
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, TranscodeError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| TranscodeError::ProbeFailed {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let audio = probe.streams.iter().find(|s| s.codec_type == "audio");
        // Cover art shows up as a video stream too; it still counts.
        let video = probe.streams.iter().find(|s| s.codec_type == "video");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes: probe
                .format
                .size
                .as_ref()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0),
            duration_secs: probe
                .format
                .duration
                .as_ref()
                .and_then(|d| d.parse::<f64>().ok())
                .unwrap_or(0.0),
            container: probe
                .format
                .format_name
                .split(',')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            audio_codec: audio.map(|s| s.codec_name.clone().unwrap_or_default()),
            video_codec: video.map(|s| s.codec_name.clone().unwrap_or_default()),
            video_width: video.and_then(|s| s.width),
            video_height: video.and_then(|s| s.height),
        })
    }

    async fn inspect_input(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
    ) -> Result<Option<MediaInfo>, TranscodeError> {
        // Dropping the pending ffprobe run kills it.
        let probed = tokio::select! {
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            probed = self.probe(&job.input_path) => probed,
        };
        match probed {
            Ok(info) => {
                self.check_input(job.format, &info)?;
                Ok(Some(info))
            }
            Err(TranscodeError::FfprobeNotFound { path }) => {
                warn!(job_id = %job.job_id, ffprobe = %path.display(), "ffprobe unavailable, skipping input checks");
                Ok(None)
            }
            Err(TranscodeError::ProbeFailed { reason }) => Err(TranscodeError::unsupported(
                format!("input is not readable media: {}", reason),
            )),
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<TranscodeProgress>>,
    ) -> Result<Artifact, TranscodeError> {
        let start = Instant::now();

        let input_size = match tokio::fs::metadata(&job.input_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranscodeError::InputNotFound {
                    path: job.input_path.clone(),
                });
            }
            Err(e) => return Err(TranscodeError::Io(e)),
        };

        let info = self.inspect_input(job, cancel).await?;

        let args = self.build_args(job, input_size);
        debug!(job_id = %job.job_id, ?args, "Starting ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscodeError::Io(e)
                }
            })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            TranscodeError::Io(std::io::Error::other("ffmpeg stderr not captured"))
        })?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail = StderrTail::new(self.config.stderr_tail_lines);
        let mut tracker = ProgressTracker::new(
            job.job_id.clone(),
            info.as_ref().map(|i| i.duration_secs).filter(|d| *d > 0.0),
            self.config.progress_interval(),
        );

        let outcome = {
            let run = async {
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(update) = tracker.observe(&line) {
                        if let Some(tx) = &progress {
                            // Non-blocking send
                            let _ = tx.try_send(update);
                        }
                    }
                    tail.push(line);
                }
                child.wait().await
            };

            tokio::select! {
                status = run => RunOutcome::Exited(status),
                _ = tokio::time::sleep(self.config.timeout()) => RunOutcome::TimedOut,
                _ = cancel.cancelled() => RunOutcome::Cancelled,
            }
        };

        let result = match outcome {
            RunOutcome::Exited(Ok(status)) if status.success() => Ok(()),
            RunOutcome::Exited(Ok(status)) => Err(TranscodeError::process_failure(
                status.code(),
                tail.joined(),
            )),
            RunOutcome::Exited(Err(e)) => Err(TranscodeError::Io(e)),
            RunOutcome::TimedOut => {
                stop(&mut child, &job.job_id).await;
                Err(TranscodeError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                })
            }
            RunOutcome::Cancelled => {
                stop(&mut child, &job.job_id).await;
                Err(TranscodeError::Cancelled)
            }
        };

        let result = match result {
            Ok(()) => self.collect_output(job, start).await,
            Err(e) => Err(e),
        };

        let label = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        metrics::TRANSCODE_DURATION
            .with_label_values(&[job.format.as_str(), label])
            .observe(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(job_id = %job.job_id, error = %e, "Transcode failed");
            if let Err(remove) = tokio::fs::remove_file(&job.output_path).await {
                if remove.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %job.output_path.display(), error = %remove, "Failed to remove partial output");
                }
            }
        }

        result
    }

    async fn collect_output(
        &self,
        job: &TranscodeJob,
        start: Instant,
    ) -> Result<Artifact, TranscodeError> {
        let size_bytes = tokio::fs::metadata(&job.output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size_bytes == 0 {
            return Err(TranscodeError::process_failure(
                Some(0),
                "ffmpeg exited cleanly but produced no output",
            ));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            job_id = %job.job_id,
            format = %job.format,
            size_bytes,
            duration_ms,
            "Transcode finished"
        );
        Ok(Artifact {
            path: job.output_path.clone(),
            size_bytes,
            format: job.format,
            duration_ms,
        })
    }

    async fn check_binary(&self, path: &Path) -> std::io::Result<()> {
        Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|_| ())
    }
}

/// Kills ffmpeg and reaps it so no orphan is left behind.
async fn stop(child: &mut Child, job_id: &str) {
    if let Err(e) = child.kill().await {
        warn!(job_id, error = %e, "Failed to kill ffmpeg");
    }
}

fn audio_args(codec: &str, bitrate: &str) -> Vec<String> {
    vec![
        "-vn".into(),
        "-c:a".into(),
        codec.into(),
        "-b:a".into(),
        bitrate.into(),
    ]
}

/// Even output dimensions, optionally capped in height.
fn scale_filter(max_height: Option<u32>) -> String {
    match max_height {
        Some(height) => format!("scale=-2:'min({},trunc(ih/2)*2)'", height),
        None => "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
    }
}

/// Last lines of ffmpeg's diagnostics, without `-progress` key=value noise.
struct StderrTail {
    lines: VecDeque<String>,
    max: usize,
    progress_line: Option<Regex>,
}

impl StderrTail {
    fn new(max: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max),
            max,
            progress_line: Regex::new(r"^[a-z0-9_]+=\S*$").ok(),
        }
    }

    fn push(&mut self, line: String) {
        let trimmed = line.trim();
        if trimmed.is_empty() || self.max == 0 {
            return;
        }
        if let Some(re) = &self.progress_line {
            if re.is_match(trimmed) {
                return;
            }
        }
        if self.lines.len() == self.max {
            self.lines.pop_front();
        }
        self.lines.push_back(trimmed.to_string());
    }

    fn joined(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Follows ffmpeg's `-progress` blocks and emits at most one update per
/// interval, at block boundaries.
struct ProgressTracker {
    job_id: String,
    duration_secs: Option<f64>,
    interval: Duration,
    last_sent: Option<Instant>,
    time_secs: f64,
    speed: Option<f32>,
    time_regex: Option<Regex>,
    speed_regex: Option<Regex>,
}

impl ProgressTracker {
    fn new(job_id: String, duration_secs: Option<f64>, interval: Duration) -> Self {
        Self {
            job_id,
            duration_secs,
            interval,
            last_sent: None,
            time_secs: 0.0,
            speed: None,
            time_regex: Regex::new(r"^out_time_(?:ms|us)=(\d+)").ok(),
            speed_regex: Regex::new(r"^speed=\s*(\d+(?:\.\d+)?)x").ok(),
        }
    }

    fn observe(&mut self, line: &str) -> Option<TranscodeProgress> {
        let line = line.trim();

        if let Some(caps) = self.time_regex.as_ref().and_then(|re| re.captures(line)) {
            if let Some(us) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                // Both keys are in microseconds.
                self.time_secs = us / 1_000_000.0;
            }
            return None;
        }

        if let Some(caps) = self.speed_regex.as_ref().and_then(|re| re.captures(line)) {
            self.speed = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok());
            return None;
        }

        let finished = match line.strip_prefix("progress=") {
            Some("end") => true,
            Some(_) => false,
            None => return None,
        };

        let due = self
            .last_sent
            .map_or(true, |at| at.elapsed() >= self.interval);
        if !due && !finished {
            return None;
        }
        self.last_sent = Some(Instant::now());

        let percent = match (self.duration_secs, finished) {
            (Some(_), true) => 100.0,
            (Some(duration), false) => (self.time_secs / duration * 100.0).clamp(0.0, 100.0) as f32,
            (None, _) => 0.0,
        };

        Some(TranscodeProgress {
            job_id: self.job_id.clone(),
            percent,
            time_secs: self.time_secs,
            duration_secs: self.duration_secs,
            speed: self.speed,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        if !path.exists() {
            return Err(TranscodeError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = timeout(PROBE_TIMEOUT, output)
            .await
            .map_err(|_| TranscodeError::ProbeFailed {
                reason: format!("ffprobe timed out after {}s", PROBE_TIMEOUT.as_secs()),
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    TranscodeError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(TranscodeError::ProbeFailed {
                reason: format!(
                    "ffprobe failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    async fn transcode(
        &self,
        job: &TranscodeJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<TranscodeProgress>>,
    ) -> Result<Artifact, TranscodeError> {
        self.run(job, cancel, progress).await
    }

    async fn validate(&self) -> Result<(), TranscodeError> {
        self.check_binary(&self.config.ffmpeg_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscodeError::Io(e)
                }
            })?;

        self.check_binary(&self.config.ffprobe_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscodeError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    TranscodeError::Io(e)
                }
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(format: OutputFormat, max_height: Option<u32>) -> TranscodeJob {
        TranscodeJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/work/source.part"),
            output_path: PathBuf::from(format!("/work/output.{}", format.extension())),
            format,
            max_height,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_mp4_args() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let args = transcoder.build_args(&job(OutputFormat::Mp4, None), 10 * 1024 * 1024);

        assert_eq!(value_after(&args, "-i"), Some("/work/source.part"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-preset"), Some("fast"));
        assert_eq!(value_after(&args, "-crf"), Some("23"));
        assert_eq!(value_after(&args, "-b:a"), Some("128k"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(
            value_after(&args, "-vf"),
            Some("scale=trunc(iw/2)*2:trunc(ih/2)*2")
        );
        assert_eq!(args.last().map(String::as_str), Some("/work/output.mp4"));
    }

    #[test]
    fn test_mp4_large_input_compressed_harder() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let args = transcoder.build_args(&job(OutputFormat::Mp4, Some(720)), 80 * 1024 * 1024);

        assert_eq!(value_after(&args, "-crf"), Some("28"));
        assert_eq!(
            value_after(&args, "-vf"),
            Some("scale=-2:'min(720,trunc(ih/2)*2)'")
        );
    }

    #[test]
    fn test_audio_args() {
        let transcoder = FfmpegTranscoder::with_defaults();

        let args = transcoder.build_args(&job(OutputFormat::Mp3, Some(1080)), 0);
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(value_after(&args, "-c:a"), Some("libmp3lame"));
        assert_eq!(value_after(&args, "-b:a"), Some("320k"));
        assert!(!args.contains(&"-vf".to_string()));

        let args = transcoder.build_args(&job(OutputFormat::M4a, None), 0);
        assert_eq!(value_after(&args, "-b:a"), Some("256k"));

        let args = transcoder.build_args(&job(OutputFormat::Opus, None), 0);
        assert_eq!(value_after(&args, "-c:a"), Some("libopus"));
        assert_eq!(value_after(&args, "-b:a"), Some("160k"));
    }

    #[test]
    fn test_mkv_is_stream_copy() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let args = transcoder.build_args(&job(OutputFormat::Mkv, Some(720)), 0);
        assert_eq!(value_after(&args, "-c"), Some("copy"));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_parse_probe_output_video() {
        let json = r#"{
            "format": {
                "filename": "test.mkv",
                "format_name": "matroska,webm",
                "duration": "93.5",
                "size": "5000000"
            },
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
                {"codec_type": "audio", "codec_name": "aac"}
            ]
        }"#;

        let info = FfmpegTranscoder::parse_probe_output(Path::new("test.mkv"), json).unwrap();
        assert_eq!(info.container, "matroska");
        assert!((info.duration_secs - 93.5).abs() < 0.01);
        assert_eq!(info.video_height, Some(1080));
        assert!(info.has_audio());
        assert!(info.has_video());
    }

    #[test]
    fn test_check_input() {
        let transcoder = FfmpegTranscoder::with_defaults();
        let audio_only = MediaInfo {
            path: PathBuf::from("a.m4a"),
            size_bytes: 10,
            duration_secs: 60.0,
            container: "mov".to_string(),
            audio_codec: Some("aac".to_string()),
            video_codec: None,
            video_width: None,
            video_height: None,
        };

        assert!(transcoder.check_input(OutputFormat::Mp3, &audio_only).is_ok());
        assert!(transcoder.check_input(OutputFormat::Mkv, &audio_only).is_ok());
        let err = transcoder
            .check_input(OutputFormat::Mp4, &audio_only)
            .unwrap_err();
        assert!(matches!(err, TranscodeError::UnsupportedFormat { .. }));

        let long = MediaInfo {
            duration_secs: 4000.0,
            ..audio_only
        };
        let err = transcoder.check_input(OutputFormat::Mp3, &long).unwrap_err();
        assert!(matches!(err, TranscodeError::TooLong { .. }));
    }

    #[test]
    fn test_stderr_tail_skips_progress_lines() {
        let mut tail = StderrTail::new(2);
        tail.push("frame=10".to_string());
        tail.push("out_time_ms=1000000".to_string());
        tail.push("first error".to_string());
        tail.push("".to_string());
        tail.push("second error".to_string());
        tail.push("third error".to_string());
        assert_eq!(tail.joined(), "second error\nthird error");
    }

    #[test]
    fn test_progress_tracker_reports_at_block_end() {
        let mut tracker = ProgressTracker::new("job".to_string(), Some(10.0), Duration::ZERO);
        assert!(tracker.observe("out_time_ms=5000000").is_none());
        assert!(tracker.observe("speed=2.5x").is_none());

        let progress = tracker.observe("progress=continue").unwrap();
        assert!((progress.percent - 50.0).abs() < 0.01);
        assert_eq!(progress.speed, Some(2.5));

        let progress = tracker.observe("progress=end").unwrap();
        assert_eq!(progress.percent, 100.0);
    }

    #[test]
    fn test_progress_tracker_throttles() {
        let mut tracker =
            ProgressTracker::new("job".to_string(), None, Duration::from_secs(3600));
        assert!(tracker.observe("progress=continue").is_some());
        assert!(tracker.observe("progress=continue").is_none());
        // The final block always gets through.
        assert!(tracker.observe("progress=end").is_some());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes an executable shell script standing in for ffmpeg.
        fn fake_ffmpeg(dir: &TempDir, body: &str) -> PathBuf {
            fake_binary(dir, "ffmpeg", body)
        }

        fn transcoder(ffmpeg: PathBuf, timeout_secs: u64) -> FfmpegTranscoder {
            let config = TranscoderConfig::with_paths(
                ffmpeg,
                PathBuf::from("/nonexistent/burrow-test/ffprobe"),
            )
            .with_timeout(timeout_secs);
            FfmpegTranscoder::new(config)
        }

        /// Shell script standing in for a binary called `name`.
        fn fake_binary(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn job_in(dir: &TempDir, format: OutputFormat) -> TranscodeJob {
            let input = dir.path().join("source.part");
            std::fs::write(&input, b"not really media").unwrap();
            TranscodeJob {
                job_id: "job-1".to_string(),
                input_path: input,
                output_path: dir.path().join(format!("output.{}", format.extension())),
                format,
                max_height: None,
            }
        }

        /// Zombies count as dead: they were killed but not yet reaped.
        fn process_alive(pid_file: &Path) -> bool {
            let pid = std::fs::read_to_string(pid_file).unwrap();
            match std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
                Ok(stat) => stat
                    .rsplit_once(')')
                    .and_then(|(_, rest)| rest.split_whitespace().next())
                    .is_some_and(|state| state != "Z"),
                Err(_) => false,
            }
        }

        #[tokio::test]
        async fn test_success_writes_artifact() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                &dir,
                "echo progress=end >&2\nfor last; do :; done\nprintf 'media' > \"$last\"",
            );
            let transcoder = transcoder(ffmpeg, 10);
            let job = job_in(&dir, OutputFormat::Mp4);

            let artifact = transcoder
                .transcode(&job, &CancellationToken::new(), None)
                .await
                .unwrap();
            assert_eq!(artifact.size_bytes, 5);
            assert_eq!(artifact.path, job.output_path);
        }

        #[tokio::test]
        async fn test_nonzero_exit_reports_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(
                &dir,
                "echo frame=1 >&2\necho 'Invalid data found when processing input' >&2\nexit 1",
            );
            let transcoder = transcoder(ffmpeg, 10);
            let job = job_in(&dir, OutputFormat::Mp3);

            let err = transcoder
                .transcode(&job, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            match err {
                TranscodeError::ProcessFailure { exit_code, stderr } => {
                    assert_eq!(exit_code, Some(1));
                    assert_eq!(stderr, "Invalid data found when processing input");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_empty_output_is_failure() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = fake_ffmpeg(&dir, "exit 0");
            let transcoder = transcoder(ffmpeg, 10);
            let job = job_in(&dir, OutputFormat::Mp3);

            let err = transcoder
                .transcode(&job, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, TranscodeError::ProcessFailure { .. }));
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("ffmpeg.pid");
            let ffmpeg = fake_ffmpeg(
                &dir,
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            );
            let transcoder = transcoder(ffmpeg, 1);
            let job = job_in(&dir, OutputFormat::Mp4);

            let started = std::time::Instant::now();
            let err = transcoder
                .transcode(&job, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, TranscodeError::Timeout { timeout_secs: 1 }));
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
            assert!(!process_alive(&pid_file));
        }

        #[tokio::test]
        async fn test_cancel_kills_process() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("ffmpeg.pid");
            let ffmpeg = fake_ffmpeg(
                &dir,
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            );
            let transcoder = transcoder(ffmpeg, 60);
            let job = job_in(&dir, OutputFormat::Mp4);

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                trigger.cancel();
            });

            let err = transcoder.transcode(&job, &cancel, None).await.unwrap_err();
            assert!(matches!(err, TranscodeError::Cancelled));
            assert!(!process_alive(&pid_file));
        }

        #[tokio::test]
        async fn test_cancel_during_input_inspection() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg_ran = dir.path().join("ffmpeg.ran");
            let ffmpeg = fake_ffmpeg(&dir, &format!("touch '{}'", ffmpeg_ran.display()));
            let pid_file = dir.path().join("ffprobe.pid");
            let ffprobe = fake_binary(
                &dir,
                "ffprobe",
                &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
            );
            let transcoder = FfmpegTranscoder::new(
                TranscoderConfig::with_paths(ffmpeg, ffprobe).with_timeout(60),
            );
            let job = job_in(&dir, OutputFormat::Mp4);

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                trigger.cancel();
            });

            let started = std::time::Instant::now();
            let err = transcoder.transcode(&job, &cancel, None).await.unwrap_err();
            assert!(matches!(err, TranscodeError::Cancelled));
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
            assert!(!ffmpeg_ran.exists());

            // kill_on_drop signals asynchronously.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            assert!(!process_alive(&pid_file));
        }

        #[tokio::test]
        async fn test_missing_ffmpeg() {
            let dir = tempfile::tempdir().unwrap();
            let transcoder = transcoder(dir.path().join("no-such-ffmpeg"), 10);
            let job = job_in(&dir, OutputFormat::Mp3);

            let err = transcoder
                .transcode(&job, &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, TranscodeError::FfmpegNotFound { .. }));
        }
    }
}
