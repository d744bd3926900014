//! WireGuard tunnel pool.
//!
//! Each tunnel is an isolated routing context: a WireGuard interface, a
//! dedicated routing table reached through a source-address rule, an
//! `unreachable` default in that table and a firewall rule rejecting any
//! packet from the tunnel address that tries to leave through another
//! interface. A tunnel failure therefore blocks traffic instead of leaking it
//! through the host's default route.
//!
//! # Example
//!
//! ```ignore
//! use burrow_core::tunnel::{CommandHost, TunnelConfigStore, TunnelManager, TunnelsConfig};
//!
//! let store = Arc::new(TunnelConfigStore::new(config.peers.clone(), config.peers_dir.clone())?);
//! let host = Arc::new(CommandHost::new(config.binaries.clone(), config.command_timeout()));
//! let manager = TunnelManager::new(config, store, host, Some(events));
//! manager.start();
//!
//! let lease = manager.acquire(Duration::from_secs(30)).await?;
//! // ... fetch through lease.interface() ...
//! manager.release(lease, true);
//! ```

mod config;
mod error;
mod host;
mod manager;
mod routing;
mod store;
mod types;

pub use config::{HostBinaries, TunnelsConfig};
pub use error::{HostError, StoreError, TunnelError};
pub use host::{CommandHost, HostCommand, HostNetwork, Program};
pub use manager::{TunnelLease, TunnelManager};
pub use routing::{RoutingPlan, RoutingStep, FIREWALL_TAG};
pub use store::TunnelConfigStore;
pub(crate) use store::validate_set as validate_peer_set;
pub use types::{
    ranges_overlap, validate_interface_name, PoolStatus, TunnelConfig, TunnelId, TunnelSnapshot,
    TunnelState, TunnelSummary, WgKey, MAX_INTERFACE_NAME_LEN,
};
