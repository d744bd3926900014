//! Tunnel pool configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::types::TunnelConfig;

/// Configuration for the tunnel pool (`[tunnels]`).
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelsConfig {
    /// Peers declared inline as `[[tunnels.peers]]`.
    #[serde(default)]
    pub peers: Vec<TunnelConfig>,

    /// Directory of `*.toml` peer files, each holding one peer.
    #[serde(default)]
    pub peers_dir: Option<PathBuf>,

    /// Upper bound on simultaneously installed routing contexts.
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: usize,

    /// Tunnels brought up ahead of demand by the maintenance loop.
    #[serde(default = "default_warm_tunnels")]
    pub warm_tunnels: usize,

    /// Prefix for generated interface names (`<prefix><slot>`).
    #[serde(default = "default_interface_prefix")]
    pub interface_prefix: String,

    /// First routing table id; slot `n` uses `table_base + n`.
    #[serde(default = "default_table_base")]
    pub table_base: u32,

    /// How long `acquire` waits for a free tunnel.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Interval between probes of idle tunnels.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Timeout of a single connectivity probe.
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    /// TCP endpoint probed through the tunnel.
    #[serde(default = "default_probe_target")]
    pub probe_target: SocketAddr,

    /// Probe a freshly provisioned tunnel before marking it active.
    #[serde(default = "default_true")]
    pub verify_on_provision: bool,

    /// Tunnels that failed a probe are skipped by acquire for this long.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Provisioning attempts before a config is declared unavailable.
    #[serde(default = "default_provision_attempts")]
    pub provision_attempts: u32,

    /// Initial backoff between provisioning attempts.
    #[serde(default = "default_provision_backoff_ms")]
    pub provision_backoff_ms: u64,

    /// Backoff ceiling between provisioning attempts.
    #[serde(default = "default_provision_backoff_max_ms")]
    pub provision_backoff_max_ms: u64,

    /// A tunnel stuck in draining longer than this raises an alert.
    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,

    /// Tick of the maintenance loop (teardown retries, stuck checks).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,

    /// Timeout for each ip/wg/iptables invocation.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Install the REJECT rule that keeps tunnel traffic off other interfaces.
    #[serde(default = "default_true")]
    pub firewall: bool,

    #[serde(default)]
    pub binaries: HostBinaries,
}

/// Paths of the host networking tools.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostBinaries {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_wg")]
    pub wg: String,
    #[serde(default = "default_iptables")]
    pub iptables: String,
    #[serde(default = "default_ip6tables")]
    pub ip6tables: String,
}

impl Default for HostBinaries {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            wg: default_wg(),
            iptables: default_iptables(),
            ip6tables: default_ip6tables(),
        }
    }
}

fn default_max_tunnels() -> usize {
    4
}

fn default_warm_tunnels() -> usize {
    1
}

fn default_interface_prefix() -> String {
    "bw".to_string()
}

fn default_table_base() -> u32 {
    51820
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_health_check_timeout_secs() -> u64 {
    5
}

fn default_probe_target() -> SocketAddr {
    SocketAddr::from(([1, 1, 1, 1], 443))
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_provision_attempts() -> u32 {
    3
}

fn default_provision_backoff_ms() -> u64 {
    500
}

fn default_provision_backoff_max_ms() -> u64 {
    10_000
}

fn default_drain_deadline_secs() -> u64 {
    120
}

fn default_maintenance_interval_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    15
}

fn default_ip() -> String {
    "ip".to_string()
}

fn default_wg() -> String {
    "wg".to_string()
}

fn default_iptables() -> String {
    "iptables".to_string()
}

fn default_ip6tables() -> String {
    "ip6tables".to_string()
}

impl Default for TunnelsConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            peers_dir: None,
            max_tunnels: default_max_tunnels(),
            warm_tunnels: default_warm_tunnels(),
            interface_prefix: default_interface_prefix(),
            table_base: default_table_base(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            probe_target: default_probe_target(),
            verify_on_provision: true,
            cooldown_secs: default_cooldown_secs(),
            provision_attempts: default_provision_attempts(),
            provision_backoff_ms: default_provision_backoff_ms(),
            provision_backoff_max_ms: default_provision_backoff_max_ms(),
            drain_deadline_secs: default_drain_deadline_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            firewall: true,
            binaries: HostBinaries::default(),
        }
    }
}

impl TunnelsConfig {
    pub fn with_peers(mut self, peers: Vec<TunnelConfig>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_max_tunnels(mut self, max: usize) -> Self {
        self.max_tunnels = max;
        self
    }

    pub fn with_warm_tunnels(mut self, warm: usize) -> Self {
        self.warm_tunnels = warm;
        self
    }

    pub fn with_provision_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.provision_backoff_ms = initial_ms;
        self.provision_backoff_max_ms = max_ms;
        self
    }

    pub fn with_acquire_timeout(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = secs;
        self
    }

    pub fn with_maintenance_interval(mut self, secs: u64) -> Self {
        self.maintenance_interval_secs = secs;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_deadline_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Backoff before provisioning attempt `attempt + 1` (1-based `attempt`).
    pub fn provision_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.provision_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.provision_backoff_max_ms))
    }
}
