//! Fetch worker configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for downloads through tunnels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Largest accepted download (MiB).
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Wall-clock limit for one download, headers to last byte (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Limit for establishing the connection (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Minimum interval between progress reports (milliseconds).
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Bind sockets to the tunnel interface and address. Only disabled in
    /// tests talking to loopback.
    #[serde(default = "default_true")]
    pub bind_interface: bool,

    /// Port of the tunnel-side nameservers.
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
}

fn default_max_size_mb() -> u64 {
    2000
}

fn default_timeout() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("burrow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_progress_interval() -> u64 {
    2000
}

fn default_max_redirects() -> usize {
    5
}

fn default_dns_port() -> u16 {
    53
}

fn default_true() -> bool {
    true
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            timeout_secs: default_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
            progress_interval_ms: default_progress_interval(),
            max_redirects: default_max_redirects(),
            bind_interface: true,
            dns_port: default_dns_port(),
        }
    }
}

impl FetchConfig {
    /// Config for fetching from local test servers.
    pub fn unbound() -> Self {
        Self {
            bind_interface: false,
            ..Default::default()
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb * 1024 * 1024
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FetchConfig::default();
        assert_eq!(config.max_bytes(), 2000 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(600));
        assert!(config.bind_interface);
        assert!(config.user_agent.starts_with("burrow/"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: FetchConfig = toml::from_str("max_size_mb = 10").unwrap();
        assert_eq!(config.max_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.connect_timeout_secs, 15);
        assert_eq!(config.dns_port, 53);
    }
}
