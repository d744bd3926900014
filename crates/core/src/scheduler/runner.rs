//! Job scheduler implementation.
//!
//! A dispatcher pulls job ids off a bounded queue and runs each job on a
//! worker permit. Every job walks an explicit state machine:
//! Acquire → Fetch → Transcode → finished, looping back to Acquire when a
//! fetch is retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::config::{AccessConfig, SchedulerConfig};
use super::error::SubmitError;
use super::throttle::SubmitThrottle;
use super::types::{
    JobErrorKind, JobFailure, JobId, JobProgress, JobRequest, JobResult, JobSnapshot, JobStatus,
    JobUpdate, StatusChange,
};
use crate::cache::ResultCache;
use crate::events::{EventHandle, PipelineEvent};
use crate::fetch::{Blob, FetchJob, FetchLimits, FetchProgress, Fetcher};
use crate::transcoder::{Artifact, JobWorkspace, OutputFormat, TranscodeJob, TranscodeProgress, Transcoder};
use crate::tunnel::{TunnelId, TunnelLease, TunnelManager};

const UPDATE_CHANNEL_CAPACITY: usize = 256;
const PROGRESS_CHANNEL_CAPACITY: usize = 16;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Counts of jobs by status.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub queued: usize,
    pub active: usize,
    pub done: usize,
    pub failed: usize,
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancellationToken,
    submitted: Instant,
    finished: Option<Instant>,
}

enum Stage {
    Acquire,
    Fetch(TunnelLease),
    Transcode(TunnelLease, Blob),
}

enum Acquired {
    Lease(TunnelLease),
    /// No capacity right now; the reason is logged with the retry.
    Busy(String),
}

/// Mutable per-run state of one job.
struct JobRun {
    id: JobId,
    url: String,
    format: OutputFormat,
    quality: Option<u32>,
    cancel: CancellationToken,
    avoid: Vec<TunnelId>,
    acquire_attempts: u32,
    fetch_attempts: u32,
    /// Most recent retryable fetch failure, reported if no tunnel is left to
    /// retry on.
    last_fetch: Option<JobFailure>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    access: AccessConfig,
    tunnels: Arc<TunnelManager>,
    fetcher: Arc<dyn Fetcher>,
    transcoder: Arc<dyn Transcoder>,
    cache: Arc<ResultCache>,
    limits: FetchLimits,
    events: Option<EventHandle>,
    throttle: SubmitThrottle,
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    updates: broadcast::Sender<JobUpdate>,
    queue: mpsc::Sender<JobId>,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Accepts download jobs and drives them through the pipeline.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    queue_rx: Mutex<Option<mpsc::Receiver<JobId>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        access: AccessConfig,
        tunnels: Arc<TunnelManager>,
        fetcher: Arc<dyn Fetcher>,
        transcoder: Arc<dyn Transcoder>,
        cache: Arc<ResultCache>,
        limits: FetchLimits,
        events: Option<EventHandle>,
    ) -> Self {
        let (queue, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SchedulerInner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                throttle: SubmitThrottle::new(access.min_submit_interval()),
                config,
                access,
                tunnels,
                fetcher,
                transcoder,
                cache,
                limits,
                events,
                jobs: RwLock::new(HashMap::new()),
                updates,
                queue,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
            queue_rx: Mutex::new(Some(queue_rx)),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the dispatcher and the pruning loop. Calling it twice has no
    /// effect.
    pub fn start(&self) {
        let Some(queue_rx) = lock(&self.queue_rx).take() else {
            warn!("Job scheduler already started");
            return;
        };

        let dispatcher = tokio::spawn(Arc::clone(&self.inner).dispatch(queue_rx));
        let pruner = tokio::spawn(Arc::clone(&self.inner).prune_loop());
        lock(&self.background).extend([dispatcher, pruner]);

        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            queue_capacity = self.inner.config.queue_capacity,
            "Job scheduler started"
        );
    }

    /// Validates and enqueues a job.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, SubmitError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let url = parse_url(&request.url)?;
        let format: OutputFormat = request
            .format
            .parse()
            .map_err(SubmitError::UnsupportedFormat)?;
        let quality = match request.quality {
            Some(_) if !format.supports_scaling() => None,
            Some(q) if !inner.config.allowed_heights.contains(&q) => {
                return Err(SubmitError::InvalidQuality {
                    quality: q,
                    allowed: inner.config.allowed_heights.clone(),
                });
            }
            other => other,
        };

        let requester = request.requester.as_deref();
        if !inner.access.is_allowed(requester) {
            return Err(SubmitError::Forbidden(
                requester.unwrap_or("anonymous").to_string(),
            ));
        }
        if let Some(requester) = requester {
            inner
                .throttle
                .check(requester)
                .await
                .map_err(|wait| SubmitError::Throttled {
                    retry_after_secs: wait.as_secs_f64().ceil().max(1.0) as u64,
                })?;
        }

        let hit = if inner.cache.config().reuse_results {
            inner.cache.lookup(url.as_str(), format, quality).await
        } else {
            None
        };

        // Claim queue space before the job becomes visible, so a full queue
        // leaves no job, event or throttle charge behind.
        let permit = match hit {
            Some(_) => None,
            None => match inner.queue.try_reserve() {
                Ok(permit) => Some(permit),
                Err(e) => {
                    if let Some(requester) = requester {
                        inner.throttle.refund(requester).await;
                    }
                    return Err(match e {
                        mpsc::error::TrySendError::Full(()) => SubmitError::QueueFull,
                        mpsc::error::TrySendError::Closed(()) => SubmitError::ShuttingDown,
                    });
                }
            },
        };

        let id = JobId::new();
        let now = Utc::now();
        let snapshot = JobSnapshot {
            id,
            url: url.to_string(),
            format,
            quality,
            requester: request.requester.clone(),
            status: JobStatus::Queued,
            history: vec![StatusChange {
                status: JobStatus::Queued,
                at: now,
            }],
            acquire_attempts: 0,
            fetch_attempts: 0,
            tunnel: None,
            progress: None,
            result: None,
            failure: None,
            created_at: now,
            updated_at: now,
        };
        inner.jobs_mut().insert(
            id,
            JobEntry {
                snapshot,
                cancel: inner.shutdown.child_token(),
                submitted: Instant::now(),
                finished: None,
            },
        );

        info!(job_id = %id, format = %format, "Job submitted");
        inner
            .emit(PipelineEvent::JobSubmitted {
                job_id: id,
                host: url.host_str().unwrap_or_default().to_string(),
                format: format.to_string(),
                requester: request.requester,
            })
            .await;
        let _ = inner.updates.send(JobUpdate::Status {
            job_id: id,
            status: JobStatus::Queued,
            failure: None,
        });

        if let Some(hit) = hit {
            debug!(job_id = %id, path = %hit.path.display(), "Served from cache");
            inner
                .finish(
                    id,
                    Ok(JobResult {
                        path: hit.path,
                        size_bytes: hit.size_bytes,
                        cached: true,
                    }),
                )
                .await;
        } else if let Some(permit) = permit {
            permit.send(id);
        }
        Ok(id)
    }

    /// Snapshot of a job. Never waits on running work.
    pub fn status(&self, id: &JobId) -> Option<JobSnapshot> {
        self.inner.jobs().get(id).map(|entry| entry.snapshot.clone())
    }

    /// All known jobs, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .inner
            .jobs()
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Cancels a job. The running stage is aborted and its tunnel released.
    pub async fn cancel(&self, id: &JobId) -> Result<(), SubmitError> {
        let not_started = {
            let jobs = self.inner.jobs();
            let entry = jobs.get(id).ok_or(SubmitError::NotFound(*id))?;
            if entry.snapshot.status.is_terminal() {
                return Err(SubmitError::AlreadyFinished(*id));
            }
            entry.cancel.cancel();
            entry.snapshot.status == JobStatus::Queued && entry.snapshot.acquire_attempts == 0
        };

        info!(job_id = %id, "Job cancelled");
        if not_started {
            self.inner
                .finish(*id, Err(JobFailure::new(JobErrorKind::Cancelled, "cancelled before start")))
                .await;
        }
        Ok(())
    }

    /// Stream of status and progress updates for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn summary(&self) -> SchedulerStatus {
        let mut status = SchedulerStatus {
            running: self.is_running(),
            ..Default::default()
        };
        for entry in self.inner.jobs().values() {
            match entry.snapshot.status {
                JobStatus::Queued => status.queued += 1,
                JobStatus::Done => status.done += 1,
                JobStatus::Failed => status.failed += 1,
                _ => status.active += 1,
            }
        }
        status
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.background).is_empty() && !self.inner.shutdown.is_cancelled()
    }

    /// Removes terminal jobs older than the retention window.
    pub async fn prune_finished(&self) -> usize {
        self.inner.prune().await
    }

    /// Cancels all jobs and waits for their tasks to wind down.
    pub async fn shutdown(&self) {
        info!("Stopping job scheduler");
        self.inner.shutdown.cancel();
        self.inner.permits.close();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let handles: Vec<JoinHandle<()>> = lock(&self.background).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        let pending: Vec<JobId> = self
            .inner
            .jobs()
            .iter()
            .filter(|(_, entry)| !entry.snapshot.status.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            self.inner
                .finish(id, Err(JobFailure::new(JobErrorKind::Cancelled, "scheduler shut down")))
                .await;
        }
        info!("Job scheduler stopped");
    }
}

impl SchedulerInner {
    fn jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_mut(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }

    async fn dispatch(self: Arc<Self>, mut queue_rx: mpsc::Receiver<JobId>) {
        debug!("Dispatcher started");
        loop {
            let id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                id = queue_rx.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let inner = Arc::clone(&self);
            self.tasks.spawn(inner.run_job(id, permit));
        }
        debug!("Dispatcher stopped");
    }

    async fn prune_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL.min(self.config.job_retention().max(Duration::from_secs(1))));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = self.prune().await;
                    if pruned > 0 {
                        debug!(pruned, "Pruned finished jobs");
                    }
                }
            }
        }
    }

    async fn prune(&self) -> usize {
        let retention = self.config.job_retention();
        let pruned = {
            let mut jobs = self.jobs_mut();
            let before = jobs.len();
            jobs.retain(|_, entry| entry.finished.is_none_or(|at| at.elapsed() < retention));
            before - jobs.len()
        };
        self.throttle.prune().await;
        pruned
    }

    async fn run_job(self: Arc<Self>, id: JobId, permit: OwnedSemaphorePermit) {
        let run = {
            let jobs = self.jobs();
            let Some(entry) = jobs.get(&id) else {
                return;
            };
            if entry.snapshot.status.is_terminal() {
                return;
            }
            JobRun {
                id,
                url: entry.snapshot.url.clone(),
                format: entry.snapshot.format,
                quality: entry.snapshot.quality,
                cancel: entry.cancel.clone(),
                avoid: Vec::new(),
                acquire_attempts: 0,
                fetch_attempts: 0,
                last_fetch: None,
            }
        };

        let outcome = match JobWorkspace::create(&self.config.temp_dir, &id.to_string()) {
            Ok(workspace) => {
                let (url, format, quality) = (run.url.clone(), run.format, run.quality);
                match self.drive(run, permit, &workspace).await {
                    Ok(artifact) => self.store_result(&url, format, quality, &artifact).await,
                    Err(failure) => Err(failure),
                }
            }
            Err(e) => Err(JobFailure::new(
                JobErrorKind::Internal,
                format!("failed to create workspace: {}", e),
            )),
        };
        self.finish(id, outcome).await;
    }

    async fn store_result(
        &self,
        url: &str,
        format: OutputFormat,
        quality: Option<u32>,
        artifact: &Artifact,
    ) -> Result<JobResult, JobFailure> {
        let cached = self
            .cache
            .store(url, format, quality, &artifact.path)
            .await
            .map_err(|e| JobFailure::new(e.kind(), e.to_string()))?;
        Ok(JobResult {
            path: cached.path,
            size_bytes: cached.size_bytes,
            cached: false,
        })
    }

    async fn drive(
        self: &Arc<Self>,
        mut run: JobRun,
        permit: OwnedSemaphorePermit,
        workspace: &JobWorkspace,
    ) -> Result<Artifact, JobFailure> {
        let mut permit = Some(permit);
        let mut stage = Stage::Acquire;

        loop {
            stage = match stage {
                Stage::Acquire => {
                    if permit.is_none() {
                        permit = Some(self.wait_for_permit(&run).await?);
                    }
                    match self.acquire(&mut run).await? {
                        Acquired::Lease(lease) => Stage::Fetch(lease),
                        Acquired::Busy(reason) => {
                            // The worker slot goes back to the pool while
                            // this job waits; it queues for a new one after.
                            permit = None;
                            self.back_off(&run, "acquire", run.acquire_attempts, &reason)
                                .await?;
                            Stage::Acquire
                        }
                    }
                }
                Stage::Fetch(lease) => match self.fetch(&mut run, lease, workspace).await? {
                    Some((lease, blob)) => Stage::Transcode(lease, blob),
                    None => Stage::Acquire,
                },
                Stage::Transcode(lease, blob) => {
                    return self.transcode(&run, lease, &blob, workspace).await;
                }
            };
        }
    }

    async fn wait_for_permit(&self, run: &JobRun) -> Result<OwnedSemaphorePermit, JobFailure> {
        tokio::select! {
            _ = run.cancel.cancelled() => Err(cancelled()),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| cancelled())
            }
        }
    }

    async fn acquire(&self, run: &mut JobRun) -> Result<Acquired, JobFailure> {
        run.acquire_attempts += 1;
        let attempts = run.acquire_attempts;
        self.update(run.id, |job| job.acquire_attempts = attempts);

        let timeout = self.tunnels.config().acquire_timeout();
        let acquired = tokio::select! {
            _ = run.cancel.cancelled() => return Err(cancelled()),
            acquired = self.tunnels.acquire_avoiding(timeout, &run.avoid) => acquired,
        };

        match acquired {
            Ok(lease) => {
                let tunnel = lease.id().clone();
                debug!(job_id = %run.id, tunnel_id = %tunnel, "Tunnel acquired");
                self.update(run.id, |job| job.tunnel = Some(tunnel));
                self.transition(run.id, JobStatus::TunnelAcquired).await;
                Ok(Acquired::Lease(lease))
            }
            Err(e) if e.is_capacity() => {
                if attempts >= self.config.max_acquire_attempts {
                    return Err(match run.last_fetch.take() {
                        Some(last) => JobFailure::new(
                            last.kind,
                            format!(
                                "{}; no tunnel left to retry on after {} attempts",
                                last.message, attempts
                            ),
                        ),
                        None => JobFailure::new(
                            JobErrorKind::NoCapacity,
                            format!("no tunnel available after {} attempts: {}", attempts, e),
                        ),
                    });
                }
                Ok(Acquired::Busy(e.to_string()))
            }
            Err(e) => Err(JobFailure::new(e.kind(), e.to_string())),
        }
    }

    /// `Ok(None)` means the fetch failed and is retried from Acquire.
    async fn fetch(
        self: &Arc<Self>,
        run: &mut JobRun,
        lease: TunnelLease,
        workspace: &JobWorkspace,
    ) -> Result<Option<(TunnelLease, Blob)>, JobFailure> {
        self.transition(run.id, JobStatus::Fetching).await;
        run.fetch_attempts += 1;
        let attempts = run.fetch_attempts;
        self.update(run.id, |job| job.fetch_attempts = attempts);

        let job = FetchJob {
            job_id: run.id.to_string(),
            url: run.url.clone(),
            dest: workspace.download_path(),
            limits: self.limits,
        };
        let progress = self.progress_sink(run.id, |p: FetchProgress| JobProgress::Fetching {
            bytes: p.bytes,
            total: p.total,
        });

        let error = match self
            .fetcher
            .fetch(&lease, &job, &run.cancel, Some(progress))
            .await
        {
            Ok(blob) => return Ok(Some((lease, blob))),
            Err(e) => e,
        };

        let tunnel = lease.id().clone();
        let faulted = error.blames_tunnel();
        self.tunnels.release(lease, !faulted);
        self.update(run.id, |job| job.tunnel = None);

        if run.cancel.is_cancelled() || error.kind() == JobErrorKind::Cancelled {
            return Err(cancelled());
        }
        if faulted {
            warn!(job_id = %run.id, tunnel_id = %tunnel, "Fetch blamed the tunnel: {}", error);
        }
        if !error.is_retryable() || attempts >= self.config.max_fetch_attempts {
            return Err(JobFailure::new(error.kind(), error.to_string()));
        }

        // Remote errors may hit any tunnel again; tunnel trouble may not.
        if error.kind() != JobErrorKind::RemoteError && !run.avoid.contains(&tunnel) {
            run.avoid.push(tunnel);
        }
        run.last_fetch = Some(JobFailure::new(error.kind(), error.to_string()));
        self.transition(run.id, JobStatus::Queued).await;
        self.back_off(run, "fetch", attempts, &error.to_string())
            .await?;
        Ok(None)
    }

    async fn transcode(
        self: &Arc<Self>,
        run: &JobRun,
        lease: TunnelLease,
        blob: &Blob,
        workspace: &JobWorkspace,
    ) -> Result<Artifact, JobFailure> {
        self.transition(run.id, JobStatus::Transcoding).await;

        let job = TranscodeJob {
            job_id: run.id.to_string(),
            input_path: blob.path.clone(),
            output_path: workspace.output_path(run.format),
            format: run.format,
            max_height: run.quality,
        };
        let progress = self.progress_sink(run.id, |p: TranscodeProgress| {
            JobProgress::Transcoding {
                percent: p.percent,
                speed: p.speed,
            }
        });

        let result = self
            .transcoder
            .transcode(&job, &run.cancel, Some(progress))
            .await;
        self.tunnels.release(lease, true);
        self.update(run.id, |job| job.tunnel = None);

        result.map_err(|e| {
            if run.cancel.is_cancelled() {
                cancelled()
            } else {
                JobFailure::new(e.kind(), e.to_string())
            }
        })
    }

    async fn back_off(
        &self,
        run: &JobRun,
        stage: &str,
        attempt: u32,
        reason: &str,
    ) -> Result<(), JobFailure> {
        let delay = self.config.retry_delay(attempt);
        info!(
            job_id = %run.id,
            stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying job: {}",
            reason
        );
        self.emit(PipelineEvent::JobRetrying {
            job_id: run.id,
            stage: stage.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
            reason: reason.to_string(),
        })
        .await;

        tokio::select! {
            _ = run.cancel.cancelled() => Err(cancelled()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Channel whose reports become the job's progress and are broadcast.
    /// The forwarding task ends once the worker drops the sender.
    fn progress_sink<T, F>(self: &Arc<Self>, id: JobId, map: F) -> mpsc::Sender<T>
    where
        T: Send + 'static,
        F: Fn(T) -> JobProgress + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            while let Some(report) = rx.recv().await {
                let progress = map(report);
                let stage = match progress {
                    JobProgress::Fetching { .. } => JobStatus::Fetching,
                    JobProgress::Transcoding { .. } => JobStatus::Transcoding,
                };
                let mut current = false;
                inner.update(id, |job| {
                    if job.status == stage {
                        job.progress = Some(progress.clone());
                        current = true;
                    }
                });
                if current {
                    let _ = inner.updates.send(JobUpdate::Progress {
                        job_id: id,
                        progress,
                    });
                }
            }
        });
        tx
    }

    fn update(&self, id: JobId, apply: impl FnOnce(&mut JobSnapshot)) {
        if let Some(entry) = self.jobs_mut().get_mut(&id) {
            apply(&mut entry.snapshot);
            entry.snapshot.updated_at = Utc::now();
        }
    }

    async fn transition(&self, id: JobId, to: JobStatus) {
        let from = {
            let mut jobs = self.jobs_mut();
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            let from = entry.snapshot.status;
            let now = Utc::now();
            entry.snapshot.status = to;
            entry.snapshot.progress = None;
            entry.snapshot.history.push(StatusChange { status: to, at: now });
            entry.snapshot.updated_at = now;
            from
        };

        debug!(job_id = %id, from = %from, to = %to, "Job state changed");
        self.emit(PipelineEvent::JobStateChanged { job_id: id, from, to })
            .await;
        let _ = self.updates.send(JobUpdate::Status {
            job_id: id,
            status: to,
            failure: None,
        });
    }

    /// Moves a job to its terminal state. A job that is already terminal is
    /// left untouched.
    async fn finish(&self, id: JobId, outcome: Result<JobResult, JobFailure>) {
        let (from, elapsed) = {
            let mut jobs = self.jobs_mut();
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            if entry.snapshot.status.is_terminal() {
                return;
            }
            let from = entry.snapshot.status;
            let now = Utc::now();
            let to = if outcome.is_ok() {
                JobStatus::Done
            } else {
                JobStatus::Failed
            };
            entry.snapshot.status = to;
            entry.snapshot.history.push(StatusChange { status: to, at: now });
            entry.snapshot.updated_at = now;
            entry.snapshot.tunnel = None;
            entry.snapshot.progress = None;
            match &outcome {
                Ok(result) => entry.snapshot.result = Some(result.clone()),
                Err(failure) => entry.snapshot.failure = Some(failure.clone()),
            }
            entry.finished = Some(Instant::now());
            (from, entry.submitted.elapsed())
        };
        let duration_ms = elapsed.as_millis() as u64;

        let (to, failure) = match outcome {
            Ok(result) => {
                info!(
                    job_id = %id,
                    cached = result.cached,
                    size_bytes = result.size_bytes,
                    "Job done"
                );
                self.emit(PipelineEvent::JobCompleted {
                    job_id: id,
                    cached: result.cached,
                    size_bytes: result.size_bytes,
                    duration_ms,
                })
                .await;
                (JobStatus::Done, None)
            }
            Err(failure) => {
                warn!(job_id = %id, kind = %failure.kind, "Job failed: {}", failure.message);
                self.emit(PipelineEvent::JobFailed {
                    job_id: id,
                    kind: failure.kind,
                    message: failure.message.clone(),
                    duration_ms,
                })
                .await;
                (JobStatus::Failed, Some(failure))
            }
        };

        self.emit(PipelineEvent::JobStateChanged { job_id: id, from, to })
            .await;
        let _ = self.updates.send(JobUpdate::Status {
            job_id: id,
            status: to,
            failure,
        });
    }
}

fn cancelled() -> JobFailure {
    JobFailure::new(JobErrorKind::Cancelled, "cancelled")
}

fn parse_url(raw: &str) -> Result<Url, SubmitError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SubmitError::InvalidUrl("empty URL".to_string()));
    }
    let url = Url::parse(trimmed).map_err(|e| SubmitError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SubmitError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(SubmitError::InvalidUrl(format!("{}: missing host", trimmed)));
    }
    Ok(url)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
