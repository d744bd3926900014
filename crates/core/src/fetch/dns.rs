//! Name resolution whose queries leave through the tunnel.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DnsError {
    /// The name has no address. Nothing a different tunnel would change.
    #[error("{host} does not resolve: {reason}")]
    NotFound { host: String, reason: String },

    #[error("resolver for {host} unreachable through the tunnel: {reason}")]
    Unreachable { host: String, reason: String },
}

impl DnsError {
    fn from_resolve(host: &str, e: ResolveError) -> Self {
        let host = host.to_string();
        let reason = e.to_string();
        match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound { host, reason },
            _ => DnsError::Unreachable { host, reason },
        }
    }
}

/// `reqwest` resolver querying fixed nameservers over UDP.
///
/// With a bind address every query is sent from the tunnel's address, so
/// policy routing carries it through the tunnel like the download itself.
#[derive(Clone)]
pub struct TunnelResolver {
    resolver: TokioAsyncResolver,
}

impl TunnelResolver {
    pub fn new(servers: &[SocketAddr], bind: Option<IpAddr>, timeout: Duration) -> Self {
        let mut config = ResolverConfig::new();
        for server in reachable_from(servers, bind) {
            let mut name_server = NameServerConfig::new(server, Protocol::Udp);
            name_server.bind_addr = bind.map(|ip| SocketAddr::new(ip, 0));
            config.add_name_server(name_server);
        }

        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        opts.use_hosts_file = false;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// The host's nameservers, queried from `bind`.
    pub fn from_system(bind: IpAddr, timeout: Duration) -> std::io::Result<Self> {
        let (config, _) = read_system_conf()
            .map_err(|e| std::io::Error::other(format!("cannot read system resolver config: {}", e)))?;

        let mut servers: Vec<SocketAddr> = Vec::new();
        for name_server in config.name_servers() {
            if name_server.protocol == Protocol::Udp && !servers.contains(&name_server.socket_addr) {
                servers.push(name_server.socket_addr);
            }
        }
        Ok(Self::new(&servers, Some(bind), timeout))
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| DnsError::from_resolve(host, e))?;
        let addresses: Vec<IpAddr> = lookup.iter().collect();
        debug!(host, addresses = addresses.len(), "Resolved through tunnel");
        Ok(addresses)
    }
}

/// A socket bound to one address family cannot reach the other.
fn reachable_from(servers: &[SocketAddr], bind: Option<IpAddr>) -> Vec<SocketAddr> {
    servers
        .iter()
        .copied()
        .filter(|server| bind.map_or(true, |ip| ip.is_ipv4() == server.is_ipv4()))
        .collect()
}

impl Resolve for TunnelResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let addresses = resolver.lookup(name.as_str()).await?;
            // reqwest fills in the port from the URL.
            let addrs: Addrs = Box::new(
                addresses
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(addrs)
        })
    }
}
