use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;
use crate::transcoder::OutputFormat;

const STAGING_SUFFIX: &str = "partial";

/// A finished artifact held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub files: usize,
    pub total_bytes: u64,
    pub max_bytes: Option<u64>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed_files: usize,
    pub freed_bytes: u64,
}

impl CleanupReport {
    fn absorb(&mut self, other: CleanupReport) {
        self.removed_files += other.removed_files;
        self.freed_bytes += other.freed_bytes;
    }
}

#[derive(Debug, Clone)]
struct Entry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl Entry {
    fn is_staging(&self) -> bool {
        self.path.extension().and_then(|e| e.to_str()) == Some(STAGING_SUFFIX)
    }
}

/// Content-addressed store of finished artifacts.
///
/// Artifacts live at `<dir>/<key[..2]>/<key>.<ext>` where the key is the
/// SHA-256 of the request parameters. Hits refresh the file's mtime, so
/// eviction is least-recently-used.
pub struct ResultCache {
    config: CacheConfig,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cache key for a request.
    pub fn key(url: &str, format: OutputFormat, quality: Option<u32>) -> String {
        let quality = quality.map_or_else(|| "best".to_string(), |q| q.to_string());
        let mut hasher = Sha256::new();
        hasher.update(format!("{}_{}_{}", url, quality, format.as_str()).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn path_for(&self, key: &str, format: OutputFormat) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.config
            .dir
            .join(shard)
            .join(format!("{}.{}", key, format.extension()))
    }

    /// Returns the cached artifact for a request, if present and non-empty.
    pub async fn lookup(
        &self,
        url: &str,
        format: OutputFormat,
        quality: Option<u32>,
    ) -> Option<CachedArtifact> {
        let path = self.path_for(&Self::key(url, format, quality), format);
        let found = tokio::task::spawn_blocking(move || {
            let meta = fs::metadata(&path).ok()?;
            if !meta.is_file() || meta.len() == 0 {
                return None;
            }
            if let Err(e) = fs::File::open(&path).and_then(|f| f.set_modified(SystemTime::now())) {
                debug!("Could not refresh mtime of {}: {}", path.display(), e);
            }
            Some(CachedArtifact {
                size_bytes: meta.len(),
                path,
            })
        })
        .await
        .ok()
        .flatten();

        if found.is_some() {
            metrics::CACHE_HITS.inc();
        }
        found
    }

    /// Moves a finished artifact into the cache.
    ///
    /// Falls back to copy-then-rename when `source` is on another filesystem,
    /// so readers never observe a half-written entry.
    pub async fn store(
        &self,
        url: &str,
        format: OutputFormat,
        quality: Option<u32>,
        source: &Path,
    ) -> Result<CachedArtifact, CacheError> {
        let dest = self.path_for(&Self::key(url, format, quality), format);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, e))?;
        }

        if let Err(e) = tokio::fs::rename(source, &dest).await {
            debug!(
                "Rename into cache failed ({}), copying {} instead",
                e,
                source.display()
            );
            let staging = dest.with_extension(format!("{}.{}", format.extension(), STAGING_SUFFIX));
            if let Err(e) = tokio::fs::copy(source, &staging).await {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(CacheError::io(source, e));
            }
            tokio::fs::rename(&staging, &dest)
                .await
                .map_err(|e| CacheError::io(&dest, e))?;
            let _ = tokio::fs::remove_file(source).await;
        }

        let size_bytes = tokio::fs::metadata(&dest)
            .await
            .map_err(|e| CacheError::io(&dest, e))?
            .len();

        debug!("Cached {} ({} bytes)", dest.display(), size_bytes);
        Ok(CachedArtifact {
            path: dest,
            size_bytes,
        })
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let dir = self.config.dir.clone();
        let entries = blocking(move || scan(&dir).map_err(|e| CacheError::io(&dir, e))).await?;

        let mut stats = CacheStats {
            max_bytes: self.config.max_size_bytes(),
            ..Default::default()
        };
        for entry in entries.iter().filter(|e| !e.is_staging()) {
            stats.files += 1;
            stats.total_bytes += entry.size;
            let modified = DateTime::<Utc>::from(entry.modified);
            stats.oldest = Some(stats.oldest.map_or(modified, |o| o.min(modified)));
            stats.newest = Some(stats.newest.map_or(modified, |n| n.max(modified)));
        }
        Ok(stats)
    }

    /// Evicts expired entries, then the least recently used ones until the
    /// cache is back under 80% of its size limit.
    pub async fn cleanup(&self) -> Result<CleanupReport, CacheError> {
        let dir = self.config.dir.clone();
        let max_age = self.config.max_age();
        let max_bytes = self.config.max_size_bytes();

        let report = blocking(move || {
            let entries = scan(&dir).map_err(|e| CacheError::io(&dir, e))?;
            let doomed = plan_eviction(entries, SystemTime::now(), max_age, max_bytes);

            let mut report = CleanupReport::default();
            for entry in doomed {
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        report.removed_files += 1;
                        report.freed_bytes += entry.size;
                        if let Some(shard) = entry.path.parent() {
                            // Fails while the shard still holds files.
                            let _ = fs::remove_dir(shard);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to evict {}: {}", entry.path.display(), e),
                }
            }
            Ok(report)
        })
        .await?;

        metrics::CACHE_EVICTIONS.inc_by(report.removed_files as u64);
        Ok(report)
    }

    /// Removes leftover job workspaces under `temp_dir` that have not been
    /// touched for `temp_max_age_secs`.
    pub async fn cleanup_stale_temp(&self, temp_dir: &Path) -> Result<CleanupReport, CacheError> {
        let temp_dir = temp_dir.to_path_buf();
        let max_age = self.config.temp_max_age();

        blocking(move || {
            let mut report = CleanupReport::default();
            let entries = match fs::read_dir(&temp_dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
                Err(e) => return Err(CacheError::io(&temp_dir, e)),
            };

            let now = SystemTime::now();
            for entry in entries.flatten() {
                let path = entry.path();
                let Ok(touched) = newest_mtime(&path) else {
                    continue;
                };
                if now.duration_since(touched).unwrap_or_default() < max_age {
                    continue;
                }

                let size = tree_size(&path);
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => {
                        debug!("Removed stale temp entry {}", path.display());
                        report.removed_files += 1;
                        report.freed_bytes += size;
                    }
                    Err(e) => warn!("Failed to remove stale temp entry {}: {}", path.display(), e),
                }
            }
            Ok(report)
        })
        .await
    }

    /// One janitor pass: stale temp entries always, the cache itself when
    /// `include_cache` is set.
    pub async fn sweep(
        &self,
        temp_dir: &Path,
        include_cache: bool,
        events: Option<&EventHandle>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.cleanup_stale_temp(temp_dir).await {
            Ok(r) => report.absorb(r),
            Err(e) => warn!("Temp cleanup failed: {}", e),
        }
        if include_cache {
            match self.cleanup().await {
                Ok(r) => report.absorb(r),
                Err(e) => warn!("Cache cleanup failed: {}", e),
            }
        }

        if report.removed_files > 0 {
            info!(
                removed_files = report.removed_files,
                freed_bytes = report.freed_bytes,
                "Cache cleanup finished"
            );
            if let Some(events) = events {
                events
                    .emit(PipelineEvent::CacheCleaned {
                        removed_files: report.removed_files,
                        freed_bytes: report.freed_bytes,
                    })
                    .await;
            }
        }
        report
    }

    /// Runs [`sweep`](Self::sweep) on startup and periodically until
    /// `shutdown` fires.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        temp_dir: PathBuf,
        events: Option<EventHandle>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let cache_every = cache.config.cleanup_interval();
        let period = cache_every.min(cache.config.temp_max_age().max(Duration::from_secs(60)));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_cache_pass: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let include_cache = last_cache_pass.is_none_or(|at| at.elapsed() >= cache_every);
                if include_cache {
                    last_cache_pass = Some(Instant::now());
                }
                cache.sweep(&temp_dir, include_cache, events.as_ref()).await;
            }
            debug!("Cache janitor stopped");
        })
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}

fn scan(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let shards = match fs::read_dir(dir) {
        Ok(shards) => shards,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e),
    };

    for shard in shards {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        for file in fs::read_dir(shard.path())? {
            let file = file?;
            let meta = file.metadata()?;
            if meta.is_file() {
                entries.push(Entry {
                    path: file.path(),
                    size: meta.len(),
                    modified: meta.modified()?,
                });
            }
        }
    }
    Ok(entries)
}

/// Picks the entries to delete: everything older than `max_age`, then the
/// oldest remaining ones until the total drops to 80% of `max_bytes`.
/// Fresh staging files are never picked by the size pass.
fn plan_eviction(
    entries: Vec<Entry>,
    now: SystemTime,
    max_age: Option<Duration>,
    max_bytes: Option<u64>,
) -> Vec<Entry> {
    let (mut doomed, mut kept): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(|e| {
        max_age.is_some_and(|max| now.duration_since(e.modified).unwrap_or_default() > max)
    });

    let Some(max_bytes) = max_bytes else {
        return doomed;
    };
    let mut total: u64 = kept.iter().map(|e| e.size).sum();
    if total <= max_bytes {
        return doomed;
    }

    let target = max_bytes / 5 * 4;
    kept.retain(|e| !e.is_staging());
    kept.sort_by_key(|e| e.modified);
    for entry in kept {
        if total <= target {
            break;
        }
        total = total.saturating_sub(entry.size);
        doomed.push(entry);
    }
    doomed
}

fn newest_mtime(path: &Path) -> io::Result<SystemTime> {
    let meta = fs::symlink_metadata(path)?;
    let mut newest = meta.modified()?;
    if meta.is_dir() {
        for child in fs::read_dir(path)?.flatten() {
            if let Ok(modified) = child.metadata().and_then(|m| m.modified()) {
                newest = newest.max(modified);
            }
        }
    }
    Ok(newest)
}

fn tree_size(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    fs::read_dir(path)
        .map(|children| children.flatten().map(|c| tree_size(&c.path())).sum())
        .unwrap_or(0)
}
