//! Scheduler and access configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Jobs running acquire/fetch/transcode at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Queued jobs waiting for a worker. Submissions beyond this are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Acquire attempts before a job fails with `NoCapacity`.
    #[serde(default = "default_max_acquire_attempts")]
    pub max_acquire_attempts: u32,

    /// Fetch attempts before a retryable fetch error fails the job.
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,

    /// Initial delay before a requeued job is retried (milliseconds).
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound for the retry delay (milliseconds).
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Multiplier applied to the delay after each retry.
    #[serde(default = "default_retry_factor")]
    pub retry_factor: f64,

    /// How long finished jobs stay queryable (seconds).
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,

    /// Video heights a request may ask for.
    #[serde(default = "default_allowed_heights")]
    pub allowed_heights: Vec<u32>,

    /// Scratch space for downloads and transcoder workspaces.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_acquire_attempts() -> u32 {
    5
}

fn default_max_fetch_attempts() -> u32 {
    3
}

fn default_retry_initial_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_retry_factor() -> f64 {
    2.0
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_allowed_heights() -> Vec<u32> {
    vec![720, 1080, 1440]
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/downloads/tmp")
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            queue_capacity: default_queue_capacity(),
            max_acquire_attempts: default_max_acquire_attempts(),
            max_fetch_attempts: default_max_fetch_attempts(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_factor: default_retry_factor(),
            job_retention_secs: default_job_retention_secs(),
            allowed_heights: default_allowed_heights(),
            temp_dir: default_temp_dir(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.retry_initial_ms = initial_ms;
        self.retry_max_ms = max_ms;
        self
    }

    pub fn with_attempts(mut self, acquire: u32, fetch: u32) -> Self {
        self.max_acquire_attempts = acquire;
        self.max_fetch_attempts = fetch;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.retry_initial_ms as f64 * self.retry_factor.max(1.0).powi(exponent);
        Duration::from_millis(delay.min(self.retry_max_ms as f64) as u64)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

/// Who may submit jobs, and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Requesters allowed to submit. Empty allows everyone.
    #[serde(default)]
    pub allowed_requesters: Vec<String>,

    /// Minimum time between two submissions of the same requester (seconds).
    /// 0 disables the check.
    #[serde(default = "default_min_submit_interval")]
    pub min_submit_interval_secs: u64,
}

fn default_min_submit_interval() -> u64 {
    20
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            allowed_requesters: Vec::new(),
            min_submit_interval_secs: default_min_submit_interval(),
        }
    }
}

impl AccessConfig {
    pub fn is_allowed(&self, requester: Option<&str>) -> bool {
        if self.allowed_requesters.is_empty() {
            return true;
        }
        requester.is_some_and(|r| self.allowed_requesters.iter().any(|a| a == r))
    }

    pub fn min_submit_interval(&self) -> Duration {
        Duration::from_secs(self.min_submit_interval_secs)
    }
}
