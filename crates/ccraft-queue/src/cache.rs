//! Deduplicating, batching submission cache.
//!
//! `submit` fingerprints the job. A live entry with the same fingerprint
//! means the job is already represented and the caller shares its handle.
//! New entries are queued in a batch; the first submission into an empty
//! batch arms a one-shot timer, and when it fires the batch is grouped by
//! queue and enqueued together. Each entry carries its own outcome channel,
//! so a failed enqueue only reaches the callers waiting on that job.
//!
//! The cache is advisory. Losing it changes broker load, never correctness.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{Fingerprint, JobHandle, QueueJob, QueueName};
use crate::metrics;
use crate::registry::QueueRegistry;

/// Anything that accepts jobs for the pipeline.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, job: QueueJob) -> QueueResult<JobHandle>;

    /// Submit a job that must reach the broker even if an identical job was
    /// already enqueued. Only a still-pending identical submission is shared.
    async fn submit_fresh(&self, job: QueueJob) -> QueueResult<JobHandle>;
}

#[derive(Debug, Clone)]
enum EntryState {
    Pending,
    Enqueued(JobHandle),
    Failed(String),
}

struct CacheEntry {
    registered_at: Instant,
    attempts: u32,
    state: watch::Sender<EntryState>,
}

impl CacheEntry {
    fn new(attempts: u32) -> Self {
        let (state, _) = watch::channel(EntryState::Pending);
        Self {
            registered_at: Instant::now(),
            attempts,
            state,
        }
    }

    fn expired(&self, config: &CacheConfig, now: Instant) -> bool {
        now.saturating_duration_since(self.registered_at) >= config.ttl
    }

    fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), EntryState::Pending)
    }

    fn is_failed(&self) -> bool {
        matches!(*self.state.borrow(), EntryState::Failed(_))
    }

    /// Suppresses duplicates: not expired, budget left, not failed.
    fn is_live(&self, config: &CacheConfig, now: Instant) -> bool {
        !self.expired(config, now) && self.attempts < config.max_attempts && !self.is_failed()
    }
}

struct Submission {
    fingerprint: Fingerprint,
    job: QueueJob,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    batch: Vec<Submission>,
}

/// Snapshot of cache state.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub batched: usize,
    pub submitted: u64,
    pub deduplicated: u64,
}

struct Shared {
    registry: Arc<QueueRegistry>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    submitted: AtomicU64,
    deduplicated: AtomicU64,
}

/// Submission cache in front of the [`QueueRegistry`].
#[derive(Clone)]
pub struct JobCache {
    shared: Arc<Shared>,
}

impl JobCache {
    pub fn new(registry: Arc<QueueRegistry>, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                config,
                state: Mutex::new(CacheState::default()),
                submitted: AtomicU64::new(0),
                deduplicated: AtomicU64::new(0),
            }),
        }
    }

    /// Submit a job. Resolves once its batch has been flushed.
    pub async fn submit(&self, job: QueueJob) -> QueueResult<JobHandle> {
        self.submit_with(job, false).await
    }

    /// Submit a job, forgetting any settled entry for the same fingerprint
    /// first. Used where an earlier identical job has already been consumed.
    pub async fn submit_fresh(&self, job: QueueJob) -> QueueResult<JobHandle> {
        self.submit_with(job, true).await
    }

    async fn submit_with(&self, job: QueueJob, fresh: bool) -> QueueResult<JobHandle> {
        let fingerprint = Fingerprint::of(&job)?;
        let queue = job.queue();
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        let mut outcome = {
            let mut state = self.shared.state.lock().await;
            let now = Instant::now();

            if fresh
                && state
                    .entries
                    .get(&fingerprint)
                    .is_some_and(|e| !e.is_pending())
            {
                state.entries.remove(&fingerprint);
                debug!(queue = %queue, fingerprint = %fingerprint, "Evicted settled entry for fresh submission");
            }

            let live = state
                .entries
                .get(&fingerprint)
                .filter(|e| e.is_live(&self.shared.config, now))
                .map(|e| e.state.subscribe());

            match live {
                Some(rx) => {
                    self.shared.deduplicated.fetch_add(1, Ordering::Relaxed);
                    metrics::record_deduplicated(queue);
                    debug!(queue = %queue, fingerprint = %fingerprint, "Duplicate submission");
                    rx
                }
                None => {
                    // A failed entry keeps its attempt count for the resubmission.
                    let attempts = state
                        .entries
                        .get(&fingerprint)
                        .filter(|e| e.is_failed() && !e.expired(&self.shared.config, now))
                        .map(|e| e.attempts)
                        .unwrap_or(0);
                    let entry = CacheEntry::new(attempts);
                    let rx = entry.state.subscribe();
                    state.entries.insert(fingerprint.clone(), entry);
                    metrics::set_cache_entries(state.entries.len());

                    let arm_timer = state.batch.is_empty();
                    state.batch.push(Submission {
                        fingerprint: fingerprint.clone(),
                        job,
                    });
                    if arm_timer {
                        self.arm_flush_timer();
                    }
                    rx
                }
            }
        };

        let settled = outcome
            .wait_for(|s| !matches!(s, EntryState::Pending))
            .await
            .map_err(|_| QueueError::closed("job cache"))?;

        match &*settled {
            EntryState::Enqueued(handle) => Ok(handle.clone()),
            EntryState::Failed(message) => Err(QueueError::enqueue_failed(message.clone())),
            EntryState::Pending => Err(QueueError::closed("job cache")),
        }
    }

    fn arm_flush_timer(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.batch_window).await;
            Self::flush(&shared).await;
        });
    }

    async fn flush(shared: &Arc<Shared>) {
        let batch = std::mem::take(&mut shared.state.lock().await.batch);
        if batch.is_empty() {
            return;
        }

        let mut groups: BTreeMap<QueueName, Vec<Submission>> = BTreeMap::new();
        for submission in batch {
            groups.entry(submission.job.queue()).or_default().push(submission);
        }
        debug!(groups = groups.len(), "Flushing job batch");

        let flushes = groups
            .into_iter()
            .map(|(queue, submissions)| Self::flush_group(shared, queue, submissions));
        join_all(flushes).await;
    }

    async fn flush_group(shared: &Arc<Shared>, queue: QueueName, submissions: Vec<Submission>) {
        let handle = match shared.registry.get_queue(queue).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(queue = %queue, "Queue unavailable for batch: {}", e);
                let message = e.to_string();
                for submission in &submissions {
                    Self::settle(shared, &submission.fingerprint, Err(message.clone())).await;
                }
                return;
            }
        };

        let results = join_all(
            submissions
                .iter()
                .map(|s| handle.enqueue(s.job.clone())),
        )
        .await;

        for (submission, result) in submissions.iter().zip(results) {
            let outcome = result.map_err(|e| {
                warn!(queue = %queue, fingerprint = %submission.fingerprint, "Enqueue failed: {}", e);
                e.to_string()
            });
            Self::settle(shared, &submission.fingerprint, outcome).await;
        }
    }

    async fn settle(shared: &Arc<Shared>, fingerprint: &Fingerprint, outcome: Result<JobHandle, String>) {
        let mut state = shared.state.lock().await;
        let Some(entry) = state.entries.get_mut(fingerprint) else {
            return;
        };

        match outcome {
            Ok(handle) => {
                entry.state.send_replace(EntryState::Enqueued(handle));
            }
            Err(message) => {
                entry.attempts += 1;
                entry.state.send_replace(EntryState::Failed(message));
                if entry.attempts >= shared.config.max_attempts {
                    state.entries.remove(fingerprint);
                    metrics::set_cache_entries(state.entries.len());
                }
            }
        }
    }

    /// Drop settled entries past TTL or out of attempts. Returns how many.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let config = &self.shared.config;
        let mut state = self.shared.state.lock().await;
        let before = state.entries.len();

        state.entries.retain(|_, entry| {
            entry.is_pending() || !(entry.expired(config, now) || entry.attempts >= config.max_attempts)
        });

        let removed = before - state.entries.len();
        metrics::set_cache_entries(state.entries.len());
        if removed > 0 {
            debug!(removed, "Swept job cache");
        }
        removed
    }

    /// Run `sweep` every sweep interval until shutdown.
    pub fn spawn_sweeper(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cache.shared.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        cache.sweep().await;
                    }
                }
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock().await;
        CacheStats {
            entries: state.entries.len(),
            batched: state.batch.len(),
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            deduplicated: self.shared.deduplicated.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl JobSubmitter for JobCache {
    async fn submit(&self, job: QueueJob) -> QueueResult<JobHandle> {
        JobCache::submit(self, job).await
    }

    async fn submit_fresh(&self, job: QueueJob) -> QueueResult<JobHandle> {
        JobCache::submit_fresh(self, job).await
    }
}
