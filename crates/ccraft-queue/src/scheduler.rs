//! Fixed-interval repeat jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::QueueResult;
use crate::job::{JobHandle, QueueJob};
use crate::registry::QueueRegistry;

/// Enqueues a job once per interval.
///
/// Every process running the same schedule competes for a broker lease per
/// tick, so the job is enqueued once per interval across the deployment.
pub struct RepeatScheduler {
    registry: Arc<QueueRegistry>,
    interval: Duration,
}

impl RepeatScheduler {
    pub fn new(registry: Arc<QueueRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    fn lease_ttl(&self) -> Duration {
        // Slightly shorter than the interval so the next tick finds it expired.
        self.interval.saturating_sub(self.interval / 10)
    }

    /// Enqueue `job` if this process wins the lease for the current tick.
    pub async fn tick(&self, job: QueueJob) -> QueueResult<Option<JobHandle>> {
        let queue = job.queue();
        let lease = format!("repeat:{}:{}", queue, job.job_type());

        let broker = self.registry.pool().acquire().await?;
        if !broker.acquire_lease(&lease, self.lease_ttl()).await? {
            debug!(queue = %queue, "Repeat tick already taken by another process");
            return Ok(None);
        }

        let handle = self.registry.get_queue(queue).await?.enqueue(job).await?;
        Ok(Some(handle))
    }

    /// Tick once now, then every interval until shutdown.
    ///
    /// The first tick is awaited here and its error returned, so a process
    /// that cannot schedule its repeat job fails at startup. Later tick
    /// failures are logged and retried on the next interval.
    pub async fn start<F>(
        self,
        make_job: F,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> QueueResult<JoinHandle<()>>
    where
        F: Fn() -> QueueJob + Send + Sync + 'static,
    {
        self.tick(make_job()).await?;

        Ok(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut interval = tokio::time::interval_at(start, self.interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.tick(make_job()).await {
                            warn!("Repeat job tick failed: {}", e);
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::config::RegistryConfig;
    use crate::job::{CleanupJob, QueueName};
    use crate::memory::{MemoryBroker, MemoryConnector};
    use crate::pool::ConnectionPool;

    fn registry(broker: Arc<MemoryBroker>) -> Arc<QueueRegistry> {
        let pool = Arc::new(ConnectionPool::new(Arc::new(MemoryConnector::new(broker))));
        Arc::new(QueueRegistry::new(pool, RegistryConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_competing_schedulers_enqueue_once_per_tick() {
        let broker = Arc::new(MemoryBroker::new());
        let interval = Duration::from_secs(300);
        let a = RepeatScheduler::new(registry(broker.clone()), interval);
        let b = RepeatScheduler::new(registry(broker.clone()), interval);

        let job = || QueueJob::CleanTempFiles(CleanupJob::now());
        assert!(a.tick(job()).await.unwrap().is_some());
        assert!(b.tick(job()).await.unwrap().is_none());

        tokio::time::advance(interval).await;
        assert!(b.tick(job()).await.unwrap().is_some());
        assert_eq!(broker.added_to(QueueName::Cleanup).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_schedule_ticks_on_interval() {
        let broker = Arc::new(MemoryBroker::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = RepeatScheduler::new(registry(broker.clone()), Duration::from_secs(300));

        let task = scheduler
            .start(|| QueueJob::CleanTempFiles(CleanupJob::now()), shutdown_rx)
            .await
            .unwrap();
        assert_eq!(broker.added_to(QueueName::Cleanup).await.len(), 1);

        tokio::time::sleep(Duration::from_secs(601)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(broker.added_to(QueueName::Cleanup).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fails_when_first_tick_fails() {
        let broker = Arc::new(MemoryBroker::new());
        let registry = registry(broker.clone());
        registry.pool().acquire().await.unwrap();
        broker.close().await.unwrap();

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = RepeatScheduler::new(registry, Duration::from_secs(300))
            .start(|| QueueJob::CleanTempFiles(CleanupJob::now()), shutdown_rx)
            .await;

        assert!(result.is_err());
        assert!(broker.added().await.is_empty());
    }
}
