//! Result cache configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the finished-artifact cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cached artifacts.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Size above which the oldest entries are evicted (MiB, 0 = unlimited).
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Entries not used for this long are evicted (hours, 0 = never).
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    /// How often the janitor runs (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Leftover job workspaces older than this are removed (seconds).
    #[serde(default = "default_temp_max_age")]
    pub temp_max_age_secs: u64,

    /// Answer submissions from the cache when the artifact already exists.
    #[serde(default = "default_true")]
    pub reuse_results: bool,
}

fn default_dir() -> PathBuf {
    PathBuf::from("/downloads/cache")
}

fn default_max_size_mb() -> u64 {
    4096
}

fn default_max_age_hours() -> u64 {
    24 * 7
}

fn default_cleanup_interval() -> u64 {
    24 * 3600
}

fn default_temp_max_age() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            max_size_mb: default_max_size_mb(),
            max_age_hours: default_max_age_hours(),
            cleanup_interval_secs: default_cleanup_interval(),
            temp_max_age_secs: default_temp_max_age(),
            reuse_results: true,
        }
    }
}

impl CacheConfig {
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_max_size_mb(mut self, max_size_mb: u64) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    pub fn max_size_bytes(&self) -> Option<u64> {
        (self.max_size_mb > 0).then(|| self.max_size_mb * 1024 * 1024)
    }

    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_hours > 0).then(|| Duration::from_secs(self.max_age_hours * 3600))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_size_bytes(), Some(4096 * 1024 * 1024));
        assert_eq!(config.max_age(), Some(Duration::from_secs(7 * 24 * 3600)));
        assert!(config.reuse_results);
    }

    #[test]
    fn test_zero_disables_limits() {
        let config: CacheConfig = toml::from_str("max_size_mb = 0\nmax_age_hours = 0").unwrap();
        assert!(config.max_size_bytes().is_none());
        assert!(config.max_age().is_none());
    }
}
