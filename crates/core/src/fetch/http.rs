//! HTTP fetcher bound to a tunnel's interface and address.

use std::error::Error;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, redirect, Client, Url};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::FetchConfig;
use super::dns::{DnsError, TunnelResolver};
use super::error::FetchError;
use super::traits::Fetcher;
use super::types::{Blob, FetchJob, FetchProgress};
use crate::metrics;
use crate::tunnel::TunnelLease;

/// Fetcher using `reqwest`, with a fresh client per download so every
/// socket is bound to the lease's routing context.
pub struct HttpFetcher {
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn client_for(&self, lease: &TunnelLease) -> Result<Client, FetchError> {
        // Never go through a proxy: it would bypass the tunnel.
        let mut builder = Client::builder()
            .no_proxy()
            .connect_timeout(self.config.connect_timeout())
            .redirect(redirect::Policy::limited(self.config.max_redirects))
            .user_agent(&self.config.user_agent)
            .pool_max_idle_per_host(0);

        if self.config.bind_interface {
            builder = builder.local_address(lease.address());
            #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
            {
                builder = builder.interface(lease.interface());
            }
        }
        if let Some(resolver) = self.resolver_for(lease)? {
            builder = builder.dns_resolver(Arc::new(resolver));
        }

        builder
            .build()
            .map_err(|e| FetchError::tunnel_fault(format!("failed to build client: {}", e)))
    }

    /// Resolver whose queries take the same path as the download: the
    /// tunnel's own nameservers if it has any, else the host's nameservers
    /// queried from the tunnel address. Unbound loopback fetches without
    /// tunnel nameservers keep reqwest's resolver.
    fn resolver_for(&self, lease: &TunnelLease) -> Result<Option<TunnelResolver>, FetchError> {
        let bind = self.config.bind_interface.then(|| lease.address());
        let timeout = self.config.connect_timeout();

        if !lease.dns().is_empty() {
            let servers: Vec<SocketAddr> = lease
                .dns()
                .iter()
                .map(|ip| SocketAddr::new(*ip, self.config.dns_port))
                .collect();
            return Ok(Some(TunnelResolver::new(&servers, bind, timeout)));
        }
        match bind {
            Some(address) => Ok(Some(TunnelResolver::from_system(address, timeout)?)),
            None => Ok(None),
        }
    }

    async fn transfer(
        &self,
        client: &Client,
        url: Url,
        job: &FetchJob,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<Blob, FetchError> {
        let start = Instant::now();
        let max_bytes = job.limits.max_bytes;

        let response = client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::remote(
                Some(status.as_u16()),
                status.canonical_reason().unwrap_or("unexpected status"),
            ));
        }

        let total = response.content_length();
        if total.is_some_and(|len| len > max_bytes) {
            return Err(FetchError::SizeExceeded {
                limit_bytes: max_bytes,
            });
        }
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut file = tokio::fs::File::create(&job.dest).await?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut last_report: Option<Instant> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            received += chunk.len() as u64;
            if received > max_bytes {
                return Err(FetchError::SizeExceeded {
                    limit_bytes: max_bytes,
                });
            }
            file.write_all(&chunk).await?;
            metrics::FETCH_BYTES.inc_by(chunk.len() as u64);

            if let Some(tx) = &progress {
                let due = last_report.map_or(true, |at| {
                    at.elapsed() >= self.config.progress_interval()
                });
                if due {
                    let _ = tx.try_send(FetchProgress {
                        bytes: received,
                        total,
                    });
                    last_report = Some(Instant::now());
                }
            }
        }
        file.flush().await?;

        if let Some(total) = total {
            if received < total {
                return Err(FetchError::tunnel_fault(format!(
                    "connection closed after {} of {} bytes",
                    received, total
                )));
            }
        }
        if let Some(tx) = &progress {
            let _ = tx.try_send(FetchProgress {
                bytes: received,
                total,
            });
        }

        Ok(Blob {
            path: job.dest.clone(),
            size_bytes: received,
            content_type,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Maps a `reqwest` failure onto tunnel faults and remote errors.
fn classify(e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        return FetchError::InvalidUrl(e.to_string());
    }
    if e.is_redirect() {
        return FetchError::remote(None, e.to_string());
    }
    // Ahead of `is_connect`, which also covers these.
    if let Some(failure) = name_or_trust_failure(&e) {
        return failure;
    }
    if e.is_connect() {
        return FetchError::tunnel_fault(describe(&e));
    }
    if let Some(kind) = io_kind(&e) {
        if matches!(
            kind,
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
                | ErrorKind::NetworkUnreachable
                | ErrorKind::HostUnreachable
                | ErrorKind::NotConnected
        ) {
            return FetchError::tunnel_fault(describe(&e));
        }
    }
    if e.is_timeout() {
        return FetchError::tunnel_fault(format!("transport timeout: {}", describe(&e)));
    }
    if e.is_request() || e.is_body() {
        // Failed mid-transfer without an HTTP answer.
        return FetchError::tunnel_fault(describe(&e));
    }
    FetchError::remote(e.status().map(|s| s.as_u16()), describe(&e))
}

/// A name that does not resolve or a certificate that is not trusted.
/// Both are the remote side's doing; only an unreachable tunnel resolver
/// blames the tunnel.
fn name_or_trust_failure(e: &(dyn Error + 'static)) -> Option<FetchError> {
    let chain = || std::iter::successors(Some(e), |&err| err.source());

    if let Some(dns) = chain().find_map(|err| err.downcast_ref::<DnsError>()) {
        return Some(match dns {
            DnsError::NotFound { .. } => FetchError::remote(None, describe(e)),
            DnsError::Unreachable { .. } => FetchError::tunnel_fault(describe(e)),
        });
    }
    // reqwest's own resolver, and rustls.
    let remote = chain().any(|err| {
        let message = err.to_string();
        message.starts_with("dns error") || message.contains("invalid peer certificate")
    });
    remote.then(|| FetchError::remote(None, describe(e)))
}

fn io_kind(e: &reqwest::Error) -> Option<ErrorKind> {
    std::iter::successors(e.source(), |&err| err.source())
        .find_map(|err| err.downcast_ref::<std::io::Error>())
        .map(|io| io.kind())
}

/// The error with its source chain, which is where the useful part lives.
fn describe(e: &(dyn Error + 'static)) -> String {
    let mut message = e.to_string();
    for err in std::iter::successors(e.source(), |&err| err.source()) {
        message.push_str(": ");
        message.push_str(&err.to_string());
    }
    message
}

fn outcome_label(result: &Result<Blob, FetchError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind().as_str(),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        lease: &TunnelLease,
        job: &FetchJob,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<FetchProgress>>,
    ) -> Result<Blob, FetchError> {
        let url = Url::parse(&job.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }

        let client = self.client_for(lease)?;
        debug!(
            job_id = %job.job_id,
            tunnel_id = %lease.id(),
            interface = lease.interface(),
            host = url.host_str().unwrap_or(""),
            "Starting download"
        );

        let timeout = job.limits.timeout;
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, self.transfer(&client, url, job, progress)) => {
                result.unwrap_or(Err(FetchError::Timeout {
                    timeout_secs: timeout.as_secs(),
                }))
            }
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
        };

        metrics::FETCHES_TOTAL
            .with_label_values(&[outcome_label(&result)])
            .inc();

        match &result {
            Ok(blob) => {
                info!(
                    job_id = %job.job_id,
                    tunnel_id = %lease.id(),
                    size_bytes = blob.size_bytes,
                    duration_ms = blob.duration_ms,
                    "Download finished"
                );
            }
            Err(e) => {
                warn!(job_id = %job.job_id, tunnel_id = %lease.id(), error = %e, "Download failed");
                if let Err(remove) = tokio::fs::remove_file(&job.dest).await {
                    if remove.kind() != ErrorKind::NotFound {
                        warn!(path = %job.dest.display(), error = %remove, "Failed to remove partial download");
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::dns::fake;
    use crate::fetch::FetchLimits;
    use std::future::Future;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// Accepts connections forever, reads the request head, then hands the
    /// socket to `handler`.
    async fn spawn_server<F, Fut>(handler: F) -> String
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request_head(&mut socket).await;
                tokio::spawn(handler(socket));
            }
        });
        format!("http://{}", addr)
    }

    async fn read_request_head(socket: &mut TcpStream) {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
    }

    fn lease() -> TunnelLease {
        TunnelLease::unmanaged("t1", "lo", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    fn job(dir: &TempDir, url: String, max_bytes: u64, timeout: Duration) -> FetchJob {
        FetchJob {
            job_id: "job-1".to_string(),
            url,
            dest: dir.path().join("source.part"),
            limits: FetchLimits { max_bytes, timeout },
        }
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(FetchConfig::unbound())
    }

    #[tokio::test]
    async fn test_fetch_writes_body() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
                .await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, format!("{}/video.mp4", url), 1024, Duration::from_secs(5));

        let (tx, mut rx) = mpsc::channel(16);
        let blob = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), Some(tx))
            .await
            .unwrap();

        assert_eq!(blob.size_bytes, 5);
        assert_eq!(blob.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(std::fs::read(&job.dest).unwrap(), b"hello");

        let mut last = None;
        while let Ok(progress) = rx.try_recv() {
            last = Some(progress);
        }
        assert_eq!(
            last,
            Some(FetchProgress {
                bytes: 5,
                total: Some(5)
            })
        );
    }

    #[tokio::test]
    async fn test_not_found_is_remote_error() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, format!("{}/missing", url), 1024, Duration::from_secs(5));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Remote { status: Some(404), .. }));
        assert!(!err.blames_tunnel());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_declared_length_over_limit() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.write_all(&[0u8; 1000]).await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, url, 100, Duration::from_secs(5));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SizeExceeded { limit_bytes: 100 }));
        assert!(!job.dest.exists());
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit() {
        // No Content-Length: the limit is only seen while streaming.
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.write_all(&[7u8; 4096]).await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, url, 1000, Duration::from_secs(5));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SizeExceeded { .. }));
        assert!(!job.dest.exists());
    }

    #[tokio::test]
    async fn test_reset_mid_body_is_tunnel_fault() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial")
                .await;
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = socket.set_linger(Some(Duration::ZERO));
            drop(socket);
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, url, 1 << 20, Duration::from_secs(5));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.blames_tunnel(), "unexpected error: {err:?}");
        assert!(!job.dest.exists());
    }

    #[tokio::test]
    async fn test_connection_refused_is_tunnel_fault() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, format!("http://{}/", addr), 1024, Duration::from_secs(5));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TunnelFault { .. }));
    }

    #[tokio::test]
    async fn test_wall_clock_timeout() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nslow")
                .await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, url, 1 << 20, Duration::from_millis(200));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(!job.dest.exists());
    }

    #[tokio::test]
    async fn test_cancel_aborts_transfer() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nslow")
                .await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, url, 1 << 20, Duration::from_secs(30));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = fetcher().fetch(&lease(), &job, &cancel, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!job.dest.exists());
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(&dir, "file:///etc/passwd".to_string(), 1024, Duration::from_secs(1));

        let err = fetcher()
            .fetch(&lease(), &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    /// Error layer with an optional cause, standing in for reqwest's chain.
    #[derive(Debug)]
    struct Layer {
        message: &'static str,
        source: Option<Box<dyn Error + Send + Sync>>,
    }

    impl Layer {
        fn wrap(message: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
            Self {
                message,
                source: Some(Box::new(source)),
            }
        }
    }

    impl std::fmt::Display for Layer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl Error for Layer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.source.as_deref().map(|e| e as &(dyn Error + 'static))
        }
    }

    fn connect_error(cause: impl Error + Send + Sync + 'static) -> Layer {
        Layer::wrap(
            "error sending request",
            Layer::wrap("client error (Connect)", cause),
        )
    }

    #[test]
    fn test_host_resolver_failure_is_remote() {
        let e = connect_error(Layer::wrap(
            "dns error",
            std::io::Error::other("failed to lookup address information"),
        ));
        let err = name_or_trust_failure(&e).unwrap();
        assert!(matches!(err, FetchError::Remote { status: None, .. }));
        assert!(!err.blames_tunnel());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("failed to lookup address"));
    }

    #[test]
    fn test_tunnel_resolver_failures() {
        let missing = connect_error(DnsError::NotFound {
            host: "gone.example".to_string(),
            reason: "no record found".to_string(),
        });
        let err = name_or_trust_failure(&missing).unwrap();
        assert!(matches!(err, FetchError::Remote { status: None, .. }));
        assert!(!err.is_retryable());

        let unreachable = connect_error(DnsError::Unreachable {
            host: "media.example".to_string(),
            reason: "request timed out".to_string(),
        });
        let err = name_or_trust_failure(&unreachable).unwrap();
        assert!(err.blames_tunnel());
    }

    #[test]
    fn test_untrusted_certificate_is_remote() {
        let e = connect_error(std::io::Error::new(
            ErrorKind::InvalidData,
            "invalid peer certificate: UnknownIssuer",
        ));
        let err = name_or_trust_failure(&e).unwrap();
        assert!(!err.blames_tunnel());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_refused_connection_is_left_to_transport_rules() {
        let e = connect_error(std::io::Error::new(
            ErrorKind::ConnectionRefused,
            "Connection refused (os error 111)",
        ));
        assert!(name_or_trust_failure(&e).is_none());
    }

    /// Fetcher resolving through a fake nameserver on loopback.
    async fn fetcher_with_nameserver(name: &str) -> (HttpFetcher, TunnelLease, fake::Queries) {
        let (nameserver, queries) = fake::spawn_nameserver(name, Ipv4Addr::LOCALHOST).await;
        let config = FetchConfig {
            dns_port: nameserver.port(),
            ..FetchConfig::unbound()
        };
        let lease = lease().with_dns(vec![nameserver.ip()]);
        (HttpFetcher::new(config), lease, queries)
    }

    #[tokio::test]
    async fn test_fetch_resolves_through_tunnel_nameserver() {
        let url = spawn_server(|mut socket| async move {
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
        })
        .await;
        let port = url.rsplit(':').next().unwrap().to_string();
        let (fetcher, lease, queries) = fetcher_with_nameserver("media.burrow.test").await;
        let dir = tempfile::tempdir().unwrap();
        // The host resolver cannot answer for the reserved .test domain.
        let job = job(
            &dir,
            format!("http://media.burrow.test:{}/video.mp4", port),
            1024,
            Duration::from_secs(5),
        );

        let blob = fetcher
            .fetch(&lease, &job, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(blob.size_bytes, 2);
        assert!(queries
            .lock()
            .unwrap()
            .iter()
            .any(|name| name == "media.burrow.test"));
    }

    #[tokio::test]
    async fn test_unknown_host_is_remote_error() {
        let (fetcher, lease, queries) = fetcher_with_nameserver("media.burrow.test").await;
        let dir = tempfile::tempdir().unwrap();
        let job = job(
            &dir,
            "http://gone.burrow.test/video.mp4".to_string(),
            1024,
            Duration::from_secs(5),
        );

        let err = fetcher
            .fetch(&lease, &job, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Remote { status: None, .. }), "{err:?}");
        assert!(!err.blames_tunnel());
        assert!(!err.is_retryable());
        assert!(queries
            .lock()
            .unwrap()
            .iter()
            .any(|name| name == "gone.burrow.test"));
    }
}
