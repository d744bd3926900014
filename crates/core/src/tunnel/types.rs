//! Tunnel configuration and pool state types.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipnet::IpNet;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Identifier of a tunnel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(String);

impl TunnelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TunnelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A WireGuard key (Curve25519, 32 bytes, base64 encoded on the wire).
///
/// `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct WgKey([u8; 32]);

impl WgKey {
    /// Decodes a base64 key, rejecting anything that is not exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64 key: {}", e))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("key must be 32 bytes, got {}", b.len()))?;
        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Short prefix of the encoded key, safe for logs of public keys.
    pub fn fingerprint(&self) -> String {
        self.to_base64().chars().take(8).collect()
    }
}

impl fmt::Debug for WgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WgKey(<redacted>)")
    }
}

impl FromStr for WgKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl<'de> Deserialize<'de> for WgKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// One WireGuard peer the pool may bring up.
///
/// Immutable once loaded. Not `Serialize`: the private key must never leave
/// the process, use [`TunnelSummary`] for anything exposed.
#[derive(Clone, Deserialize)]
pub struct TunnelConfig {
    pub id: TunnelId,
    pub private_key: WgKey,
    pub peer_public_key: WgKey,
    /// `host:port` of the remote peer.
    pub endpoint: String,
    /// Ranges routed through this tunnel.
    pub allowed_ips: Vec<IpNet>,
    /// Address assigned to the local end of the tunnel.
    pub address: IpNet,
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
    /// Fixed interface name; generated from the pool prefix when absent.
    #[serde(default)]
    pub interface_name: Option<String>,
    /// Resolvers queried through the tunnel. Must lie inside `allowed_ips`.
    /// When empty, the host's nameservers are queried from the tunnel
    /// address instead.
    #[serde(default)]
    pub dns: Vec<IpAddr>,
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("id", &self.id)
            .field("peer", &self.peer_public_key.fingerprint())
            .field("endpoint", &self.endpoint)
            .field("allowed_ips", &self.allowed_ips)
            .field("address", &self.address)
            .field("interface_name", &self.interface_name)
            .field("dns", &self.dns)
            .finish_non_exhaustive()
    }
}

impl TunnelConfig {
    /// Checks the fields serde cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        let id = self.id.as_str();
        if id.is_empty() {
            return Err("tunnel id cannot be empty".to_string());
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!("tunnel id '{}' contains invalid characters", id));
        }

        if self.allowed_ips.is_empty() {
            return Err(format!("tunnel '{}' has no allowed_ips", id));
        }

        match self.endpoint.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => {
                return Err(format!(
                    "tunnel '{}' endpoint '{}' must be host:port",
                    id, self.endpoint
                ))
            }
        }

        if let Some(name) = &self.interface_name {
            validate_interface_name(name)
                .map_err(|e| format!("tunnel '{}': {}", id, e))?;
        }

        // A resolver outside the routed ranges hits the fail-closed route.
        if let Some(server) = self
            .dns
            .iter()
            .find(|server| !self.allowed_ips.iter().any(|range| range.contains(*server)))
        {
            return Err(format!(
                "tunnel '{}' dns server {} is outside allowed_ips",
                id, server
            ));
        }

        Ok(())
    }

    /// True when any allowed range of `self` intersects one of `other`.
    pub fn overlaps(&self, other: &TunnelConfig) -> bool {
        self.allowed_ips
            .iter()
            .any(|a| other.allowed_ips.iter().any(|b| ranges_overlap(a, b)))
    }

    pub fn summary(&self) -> TunnelSummary {
        TunnelSummary {
            id: self.id.clone(),
            endpoint: self.endpoint.clone(),
            peer: self.peer_public_key.fingerprint(),
            allowed_ips: self.allowed_ips.clone(),
            address: self.address,
            dns: self.dns.clone(),
        }
    }
}

/// CIDR blocks either nest or are disjoint.
pub fn ranges_overlap(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b) || b.contains(a)
}

pub fn validate_interface_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(format!(
            "interface name '{}' must be 1-{} bytes",
            name, MAX_INTERFACE_NAME_LEN
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(format!("interface name '{}' contains invalid characters", name));
    }
    Ok(())
}

/// Public view of a tunnel configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSummary {
    pub id: TunnelId,
    pub endpoint: String,
    pub peer: String,
    pub allowed_ips: Vec<IpNet>,
    pub address: IpNet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<IpAddr>,
}

/// Lifecycle of a routing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Provisioning,
    Active,
    Draining,
    Destroyed,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Provisioning => "provisioning",
            TunnelState::Active => "active",
            TunnelState::Draining => "draining",
            TunnelState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one pool slot.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSnapshot {
    pub id: TunnelId,
    pub interface: String,
    pub table: u32,
    pub state: TunnelState,
    pub leased: bool,
    pub fault_count: u32,
    pub provision_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draining_for_secs: Option<u64>,
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub running: bool,
    pub max_tunnels: usize,
    pub configured: usize,
    pub tunnels: Vec<TunnelSnapshot>,
}

impl PoolStatus {
    pub fn count_in(&self, state: TunnelState) -> usize {
        self.tunnels.iter().filter(|t| t.state == state).count()
    }

    pub fn leased(&self) -> usize {
        self.tunnels.iter().filter(|t| t.leased).count()
    }

    pub fn get(&self, id: &TunnelId) -> Option<&TunnelSnapshot> {
        self.tunnels.iter().find(|t| &t.id == id)
    }
}
