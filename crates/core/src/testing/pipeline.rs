//! A fully wired scheduler over mock boundaries.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::{MockFetcher, MockHostNetwork, MockTranscoder};
use crate::cache::{CacheConfig, ResultCache};
use crate::fetch::FetchLimits;
use crate::scheduler::{AccessConfig, JobId, JobScheduler, JobSnapshot, SchedulerConfig};
use crate::tunnel::{TunnelConfig, TunnelConfigStore, TunnelManager, TunnelsConfig};

/// Knobs for [`TestPipeline::start_with`]. Defaults favor fast tests:
/// millisecond retries, no warm tunnels, no submit cooldown.
pub struct PipelineSettings {
    pub tunnels: TunnelsConfig,
    pub scheduler: SchedulerConfig,
    pub access: AccessConfig,
    pub cache: CacheConfig,
    pub limits: FetchLimits,
    /// Leaves the scheduler unstarted, so nothing drains its queue.
    pub paused: bool,
}

/// Scheduler, tunnel pool and cache backed by mocks and a temp directory.
pub struct TestPipeline {
    pub scheduler: Arc<JobScheduler>,
    pub tunnels: Arc<TunnelManager>,
    pub cache: Arc<ResultCache>,
    pub host: Arc<MockHostNetwork>,
    pub fetcher: Arc<MockFetcher>,
    pub transcoder: Arc<MockTranscoder>,
    pub dir: TempDir,
}

impl TestPipeline {
    pub fn start(peers: Vec<TunnelConfig>) -> Self {
        Self::start_with(peers, |_| {})
    }

    pub fn start_with(peers: Vec<TunnelConfig>, configure: impl FnOnce(&mut PipelineSettings)) -> Self {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("failed to create test directory: {}", e),
        };

        let mut settings = PipelineSettings {
            tunnels: TunnelsConfig::default()
                .with_max_tunnels(peers.len().max(1))
                .with_warm_tunnels(0)
                .with_provision_backoff(1, 5)
                .with_acquire_timeout(2),
            scheduler: SchedulerConfig::default()
                .with_temp_dir(dir.path().join("tmp"))
                .with_retry(5, 20),
            access: AccessConfig {
                allowed_requesters: Vec::new(),
                min_submit_interval_secs: 0,
            },
            cache: CacheConfig::default().with_dir(dir.path().join("cache")),
            limits: FetchLimits {
                max_bytes: 10 * 1024 * 1024,
                timeout: Duration::from_secs(5),
            },
            paused: false,
        };
        configure(&mut settings);

        let store = match TunnelConfigStore::from_configs(peers) {
            Ok(store) => Arc::new(store),
            Err(e) => panic!("invalid test tunnel set: {}", e),
        };
        let host = Arc::new(MockHostNetwork::new());
        let fetcher = Arc::new(MockFetcher::new());
        let transcoder = Arc::new(MockTranscoder::new());
        let cache = Arc::new(ResultCache::new(settings.cache));

        let tunnels = Arc::new(TunnelManager::new(settings.tunnels, store, host.clone(), None));
        tunnels.start();

        let scheduler = Arc::new(JobScheduler::new(
            settings.scheduler,
            settings.access,
            Arc::clone(&tunnels),
            fetcher.clone(),
            transcoder.clone(),
            Arc::clone(&cache),
            settings.limits,
            None,
        ));
        if !settings.paused {
            scheduler.start();
        }

        Self {
            scheduler,
            tunnels,
            cache,
            host,
            fetcher,
            transcoder,
            dir,
        }
    }

    /// Polls until the job is `Done` or `Failed`; panics after ten seconds.
    pub async fn wait_for_terminal(&self, id: &JobId) -> JobSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(job) = self.scheduler.status(id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {} did not finish: {:?}", id, self.scheduler.status(id));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Polls until `check` holds for the job; panics after ten seconds.
    pub async fn wait_until(&self, id: &JobId, check: impl Fn(&JobSnapshot) -> bool) -> JobSnapshot {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(job) = self.scheduler.status(id) {
                if check(&job) {
                    return job;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {} never reached the expected state", id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.tunnels.shutdown().await;
    }
}
