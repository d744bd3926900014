use std::sync::Arc;

use burrow_core::{Config, JobScheduler, ResultCache, SanitizedConfig, TunnelManager};

/// Shared application state
pub struct AppState {
    config: Config,
    scheduler: Arc<JobScheduler>,
    tunnels: Arc<TunnelManager>,
    cache: Arc<ResultCache>,
}

impl AppState {
    pub fn new(
        config: Config,
        scheduler: Arc<JobScheduler>,
        tunnels: Arc<TunnelManager>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            config,
            scheduler,
            tunnels,
            cache,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// Key every API request must carry, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.config
            .server
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn tunnels(&self) -> &TunnelManager {
        &self.tunnels
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }
}
