//! Fetch worker: downloads remote media through a leased tunnel.
//!
//! Connection-level failures are reported as [`FetchError::TunnelFault`] so
//! the scheduler can retire the tunnel; HTTP error statuses are
//! [`FetchError::Remote`] and leave the tunnel alone. Host names are
//! resolved by a [`TunnelResolver`] whose queries also leave through the
//! tunnel; a name that does not exist is a remote failure.

mod config;
mod dns;
mod error;
mod http;
mod traits;
mod types;

pub use config::FetchConfig;
pub use dns::{DnsError, TunnelResolver};
pub use error::FetchError;
pub use http::HttpFetcher;
pub use traits::Fetcher;
pub use types::{Blob, FetchJob, FetchLimits, FetchProgress};
