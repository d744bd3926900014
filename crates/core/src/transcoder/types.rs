//! Types for the transcoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Output format of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// H.264 + AAC in MP4, streamable.
    Mp4,
    /// VP9 + Opus in WebM.
    Webm,
    /// Stream copy into Matroska.
    Mkv,
    /// LAME 320k, audio only.
    Mp3,
    /// AAC 256k, audio only.
    M4a,
    /// Opus 160k, audio only.
    Opus,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Mp4,
        OutputFormat::Webm,
        OutputFormat::Mkv,
        OutputFormat::Mp3,
        OutputFormat::M4a,
        OutputFormat::Opus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mkv => "mkv",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Opus => "opus",
        }
    }

    /// File extension of the output.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Whether the output drops the video stream.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, Self::Mp3 | Self::M4a | Self::Opus)
    }

    /// Whether a height limit means anything for this format.
    pub fn supports_scaling(&self) -> bool {
        matches!(self, Self::Mp4 | Self::Webm)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == wanted)
            .ok_or_else(|| format!("unsupported output format: {}", s))
    }
}

/// One transcoder run.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Identifier used in logs.
    pub job_id: String,
    /// Downloaded blob.
    pub input_path: PathBuf,
    /// Where ffmpeg writes the artifact.
    pub output_path: PathBuf,
    pub format: OutputFormat,
    /// Maximum video height, ignored for audio and stream copy.
    pub max_height: Option<u32>,
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: OutputFormat,
    pub duration_ms: u64,
}

/// Information about a media file, from ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: f64,
    /// Container name (first entry of ffprobe's `format_name`).
    pub container: String,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }
}

/// Progress of a running transcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProgress {
    pub job_id: String,
    /// 0-100, 0 when the input duration is unknown.
    pub percent: f32,
    pub time_secs: f64,
    pub duration_secs: Option<f64>,
    /// Encoding speed relative to real time.
    pub speed: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("mp4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
        assert_eq!(" MP3 ".parse::<OutputFormat>().unwrap(), OutputFormat::Mp3);
        assert!("flac".parse::<OutputFormat>().is_err());
        assert!("".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_audio_only() {
        assert!(OutputFormat::Mp3.is_audio_only());
        assert!(OutputFormat::Opus.is_audio_only());
        assert!(!OutputFormat::Mkv.is_audio_only());
        assert!(!OutputFormat::Mkv.supports_scaling());
        assert!(OutputFormat::Webm.supports_scaling());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&OutputFormat::M4a).unwrap();
        assert_eq!(json, "\"m4a\"");
    }
}
