use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cache::CacheConfig;
use crate::fetch::FetchConfig;
use crate::scheduler::{AccessConfig, SchedulerConfig};
use crate::transcoder::TranscoderConfig;
use crate::tunnel::{TunnelSummary, TunnelsConfig};

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tunnels: TunnelsConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub access: AccessConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// When set, API requests must carry this key.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: SanitizedServerConfig,
    pub tunnels: SanitizedTunnelsConfig,
    pub fetch: FetchConfig,
    pub transcoder: TranscoderConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub access: SanitizedAccessConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub api_key_configured: bool,
}

/// Tunnel pool settings; peers are listed without key material.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTunnelsConfig {
    pub peers: Vec<TunnelSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_dir: Option<PathBuf>,
    pub max_tunnels: usize,
    pub warm_tunnels: usize,
    pub interface_prefix: String,
    pub acquire_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub firewall: bool,
}

/// Requester ids are not exposed, only how many there are.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAccessConfig {
    pub allowed_requesters: usize,
    pub min_submit_interval_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: SanitizedServerConfig {
                host: config.server.host,
                port: config.server.port,
                api_key_configured: config
                    .server
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            tunnels: SanitizedTunnelsConfig {
                peers: config.tunnels.peers.iter().map(|p| p.summary()).collect(),
                peers_dir: config.tunnels.peers_dir.clone(),
                max_tunnels: config.tunnels.max_tunnels,
                warm_tunnels: config.tunnels.warm_tunnels,
                interface_prefix: config.tunnels.interface_prefix.clone(),
                acquire_timeout_secs: config.tunnels.acquire_timeout_secs,
                health_check_interval_secs: config.tunnels.health_check_interval_secs,
                firewall: config.tunnels.firewall,
            },
            fetch: config.fetch.clone(),
            transcoder: config.transcoder.clone(),
            scheduler: config.scheduler.clone(),
            cache: config.cache.clone(),
            access: SanitizedAccessConfig {
                allowed_requesters: config.access.allowed_requesters.len(),
                min_submit_interval_secs: config.access.min_submit_interval_secs,
            },
        }
    }
}
