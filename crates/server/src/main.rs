use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow_core::fetch::FetchLimits;
use burrow_core::tunnel::HostNetwork;
use burrow_core::{
    create_event_system, load_config, validate_config, CommandHost, Fetcher, FfmpegTranscoder,
    HttpFetcher, JobScheduler, PipelineEvent, ResultCache, TunnelConfigStore, TunnelManager,
    Transcoder,
};
use burrow_server::api::create_router;
use burrow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the pipeline event channel
const EVENT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    let json = std::env::var("BURROW_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("BURROW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!(
        peers = config.tunnels.peers.len(),
        max_tunnels = config.tunnels.max_tunnels,
        workers = config.scheduler.max_concurrent_jobs,
        "Configuration loaded successfully"
    );

    // Create event system
    let (events, event_writer) = create_event_system(EVENT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(event_writer.run());

    events
        .emit(PipelineEvent::ServiceStarted {
            version: VERSION.to_string(),
        })
        .await;

    // Tunnel pool
    let store = Arc::new(
        TunnelConfigStore::new(config.tunnels.peers.clone(), config.tunnels.peers_dir.clone())
            .context("Failed to load tunnel configurations")?,
    );
    info!(configured = store.len(), "Tunnel configurations loaded");

    let host: Arc<dyn HostNetwork> = Arc::new(CommandHost::new(
        config.tunnels.binaries.clone(),
        config.tunnels.command_timeout(),
    ));
    let tunnels = Arc::new(TunnelManager::new(
        config.tunnels.clone(),
        store,
        host,
        Some(events.clone()),
    ));
    tunnels.start();

    // Workers
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.fetch.clone()));
    let transcoder = FfmpegTranscoder::new(config.transcoder.clone());
    if let Err(e) = transcoder.validate().await {
        warn!(error = %e, "Transcoder unavailable, jobs will fail at the transcode stage");
    }
    let transcoder: Arc<dyn Transcoder> = Arc::new(transcoder);

    // Result cache and janitor
    let cache = Arc::new(ResultCache::new(config.cache.clone()));
    let background = CancellationToken::new();
    let janitor = cache.spawn_janitor(
        config.scheduler.temp_dir.clone(),
        Some(events.clone()),
        background.clone(),
    );

    // Scheduler
    let scheduler = Arc::new(JobScheduler::new(
        config.scheduler.clone(),
        config.access.clone(),
        Arc::clone(&tunnels),
        fetcher,
        transcoder,
        Arc::clone(&cache),
        FetchLimits::from_config(&config.fetch),
        Some(events.clone()),
    ));
    scheduler.start();
    info!("Job scheduler started");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&scheduler),
        Arc::clone(&tunnels),
        cache,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Jobs first so their leases come back, then the routing contexts
    scheduler.shutdown().await;
    tunnels.shutdown().await;
    background.cancel();
    let _ = janitor.await;

    events
        .emit(PipelineEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer stops once every handle is gone.
    drop(scheduler);
    drop(tunnels);
    drop(events);
    let _ = writer_handle.await;
    info!("Event writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
