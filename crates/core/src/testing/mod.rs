//! Testing utilities and mock implementations.
//!
//! Mocks for every external boundary of the pipeline (host networking, the
//! fetcher and the transcoder), so the scheduler and tunnel pool can be
//! exercised end to end without root, WireGuard or ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use burrow_core::testing::{fixtures, TestPipeline};
//!
//! let pipeline = TestPipeline::start(vec![
//!     fixtures::tunnel_config("a", "10.1.0.0/16"),
//! ]);
//! let id = pipeline.scheduler.submit(JobRequest::new(url, "mp4")).await?;
//! let job = pipeline.wait_for_terminal(&id).await;
//! ```

mod mock_fetcher;
mod mock_host;
mod mock_transcoder;
mod pipeline;

pub use mock_fetcher::{MockFetcher, RecordedFetch};
pub use mock_host::MockHostNetwork;
pub use mock_transcoder::MockTranscoder;
pub use pipeline::{PipelineSettings, TestPipeline};

/// Test fixtures and helper functions.
pub mod fixtures {
    use ipnet::IpNet;

    use crate::tunnel::{TunnelConfig, TunnelId, WgKey};

    pub const PRIVATE_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    pub const PEER_PUBLIC_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn parse_net(value: &str) -> IpNet {
        match value.parse() {
            Ok(net) => net,
            Err(e) => panic!("invalid test network {:?}: {}", value, e),
        }
    }

    fn key(encoded: &str) -> WgKey {
        match WgKey::from_base64(encoded) {
            Ok(key) => key,
            Err(e) => panic!("invalid test key: {}", e),
        }
    }

    /// A valid tunnel configuration routing `allowed` through peer `id`.
    ///
    /// The local address is derived from the id, so distinct ids get
    /// distinct addresses.
    pub fn tunnel_config(id: &str, allowed: &str) -> TunnelConfig {
        let octet = id
            .bytes()
            .fold(7u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32))
            % 250
            + 1;

        TunnelConfig {
            id: TunnelId::new(id),
            private_key: key(PRIVATE_KEY),
            peer_public_key: key(PEER_PUBLIC_KEY),
            endpoint: format!("{}.vpn.example.net:51820", id),
            allowed_ips: vec![parse_net(allowed)],
            address: parse_net(&format!("10.66.{}.2/32", octet)),
            persistent_keepalive: Some(25),
            interface_name: None,
            dns: Vec::new(),
        }
    }

    /// Peer config file contents as an operator would write them.
    pub fn peer_toml(id: &str, allowed: &str) -> String {
        format!(
            "id = \"{}\"\nprivate_key = \"{}\"\npeer_public_key = \"{}\"\nendpoint = \"{}.vpn.example.net:51820\"\nallowed_ips = [\"{}\"]\naddress = \"10.66.0.2/32\"\n",
            id, PRIVATE_KEY, PEER_PUBLIC_KEY, id, allowed
        )
    }
}
