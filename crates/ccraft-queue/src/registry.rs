//! Lazy queue registry.
//!
//! Queue handles are created on first use over the pooled connection and
//! closed by a periodic sweep once they have been idle long enough.
//!
//! A handle owns no broker-side resource: every handle shares the pooled
//! connection, and a Redis stream and its consumer group outlive any handle.
//! Closing a handle only retires the local object, so later enqueues through
//! it fail and the registry builds a fresh one on the next `get_queue`.
//! Waiting jobs and the connection are untouched; the connection is released
//! by [`ConnectionPool::shutdown`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::config::RegistryConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{JobEnvelope, JobHandle, JobOptions, QueueJob, QueueName};
use crate::metrics;
use crate::pool::ConnectionPool;

/// Named producer handle over the shared connection.
pub struct QueueHandle {
    name: QueueName,
    broker: Arc<dyn Broker>,
    epoch: Instant,
    last_used_ms: AtomicU64,
    closed: AtomicBool,
}

impl QueueHandle {
    fn new(name: QueueName, broker: Arc<dyn Broker>, epoch: Instant) -> Self {
        let handle = Self {
            name,
            broker,
            epoch,
            last_used_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        };
        handle.touch();
        handle
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_used_ms.store(now, Ordering::Relaxed);
    }

    /// Time since the handle was last used.
    pub fn idle_for(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_used_ms.load(Ordering::Relaxed)))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Retire the handle. Nothing is sent to the broker.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Enqueue with this queue's default options.
    pub async fn enqueue(&self, job: QueueJob) -> QueueResult<JobHandle> {
        let options = self.name.default_options();
        self.enqueue_with(job, options).await
    }

    pub async fn enqueue_with(&self, job: QueueJob, options: JobOptions) -> QueueResult<JobHandle> {
        if self.is_closed() {
            return Err(QueueError::closed(self.name.as_str()));
        }
        if job.queue() != self.name {
            return Err(QueueError::enqueue_failed(format!(
                "{} job does not belong on {}",
                job.job_type(),
                self.name
            )));
        }
        self.touch();

        let envelope = JobEnvelope::new(job, options);
        self.broker.add(&envelope).await?;
        metrics::record_enqueued(self.name);
        info!(
            queue = %self.name,
            job_id = %envelope.id,
            job_type = envelope.job_type(),
            "Enqueued job"
        );
        Ok(envelope.handle())
    }
}

/// Snapshot of registry state.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub open_handles: usize,
    pub queues: Vec<QueueName>,
}

/// Creates and caches [`QueueHandle`]s by name.
pub struct QueueRegistry {
    pool: Arc<ConnectionPool>,
    config: RegistryConfig,
    handles: Mutex<HashMap<QueueName, Arc<QueueHandle>>>,
    epoch: Instant,
}

impl QueueRegistry {
    pub fn new(pool: Arc<ConnectionPool>, config: RegistryConfig) -> Self {
        Self {
            pool,
            config,
            handles: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Existing handle for `name`, or a new one over the pooled connection.
    pub async fn get_queue(&self, name: QueueName) -> QueueResult<Arc<QueueHandle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&name) {
            handle.touch();
            return Ok(Arc::clone(handle));
        }

        let broker = self.pool.acquire().await?;
        broker.ensure_queue(name).await?;

        let handle = Arc::new(QueueHandle::new(name, broker, self.epoch));
        handles.insert(name, Arc::clone(&handle));
        metrics::set_open_handles(handles.len());
        debug!(queue = %name, "Created queue handle");
        Ok(handle)
    }

    /// Close and drop handles idle past the threshold. Returns how many.
    pub async fn sweep_idle(&self) -> usize {
        let mut handles = self.handles.lock().await;
        let idle: Vec<QueueName> = handles
            .iter()
            .filter(|(_, h)| h.idle_for() >= self.config.idle_threshold)
            .map(|(name, _)| *name)
            .collect();

        for name in &idle {
            if let Some(handle) = handles.remove(name) {
                handle.close();
                info!(queue = %name, idle_secs = handle.idle_for().as_secs(), "Closed idle queue handle");
            }
        }
        metrics::set_open_handles(handles.len());
        idle.len()
    }

    /// Run `sweep_idle` every sweep interval until shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.sweep_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        registry.sweep_idle().await;
                    }
                }
            }
        })
    }

    /// Close every handle. Returns how many were open.
    pub async fn close_all(&self) -> usize {
        let mut handles = self.handles.lock().await;
        let count = handles.len();
        for (_, handle) in handles.drain() {
            handle.close();
        }
        metrics::set_open_handles(0);
        if count > 0 {
            info!("Closed {} queue handles", count);
        }
        count
    }

    pub async fn stats(&self) -> RegistryStats {
        let handles = self.handles.lock().await;
        let mut queues: Vec<QueueName> = handles.keys().copied().collect();
        queues.sort();
        RegistryStats {
            open_handles: handles.len(),
            queues,
        }
    }
}
