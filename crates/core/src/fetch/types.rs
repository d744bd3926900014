//! Types for the fetch module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::config::FetchConfig;

/// Bounds applied to one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl FetchLimits {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_bytes: config.max_bytes(),
            timeout: config.timeout(),
        }
    }
}

/// One download.
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Identifier used in logs.
    pub job_id: String,
    pub url: String,
    /// File the body is streamed into. Removed again if the fetch fails.
    pub dest: PathBuf,
    pub limits: FetchLimits,
}

/// A completed download on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub duration_ms: u64,
}

/// Bytes received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProgress {
    pub bytes: u64,
    /// Declared length, when the server sent one.
    pub total: Option<u64>,
}

impl FetchProgress {
    pub fn percent(&self) -> Option<f32> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| (self.bytes as f64 / total as f64 * 100.0).min(100.0) as f32)
    }
}
