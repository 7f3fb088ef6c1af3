//! Stage executor.
//!
//! Owns one stage's consumer together with the process's background tasks
//! (registry sweeper, cache sweeper, stats monitor and, for cleanup, the
//! repeat scheduler) and tears them down in order on shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ccraft_queue::{
    spawn_monitor, CleanupJob, ConsumerConfig, JobCache, JobProcessor, QueueConsumer, QueueJob,
    QueueName, QueueRegistry, QueueResult, RepeatScheduler,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Runs one stage consumer until shutdown.
pub struct JobExecutor {
    config: WorkerConfig,
    consumer_config: ConsumerConfig,
    registry: Arc<QueueRegistry>,
    cache: JobCache,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        consumer_config: ConsumerConfig,
        registry: Arc<QueueRegistry>,
        cache: JobCache,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            consumer_config,
            registry,
            cache,
            shutdown,
        }
    }

    /// Signal shutdown. Takes effect even if `run` has not started yet.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Consume with `processor` until [`JobExecutor::shutdown`] is called or
    /// the consumer stops on its own, then release queue handles and the
    /// pooled connection.
    pub async fn run(&self, processor: Arc<dyn JobProcessor>) -> WorkerResult<()> {
        let queue = processor.queue();
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;

        let broker = self.registry.pool().acquire().await?;
        let consumer = Arc::new(QueueConsumer::new(
            broker,
            processor,
            self.consumer_config.clone(),
        ));

        let (stop_background, stop_rx) = watch::channel(false);
        let mut background = Vec::new();
        if queue == QueueName::Cleanup {
            match self.schedule_cleanup(&stop_rx).await {
                Ok(task) => background.push(task),
                Err(e) => {
                    error!("Failed to schedule repeat cleanup job: {}", e);
                    self.release().await;
                    return Err(e.into());
                }
            }
        }
        background.extend(self.spawn_background(&stop_rx));
        info!(queue = %queue, temp_dir = %self.config.temp_dir.display(), "Job executor started");

        let mut runner = tokio::spawn({
            let consumer = Arc::clone(&consumer);
            async move { consumer.run().await }
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        let joined = tokio::select! {
            joined = &mut runner => joined,
            _ = async { shutdown_rx.wait_for(|stopped| *stopped).await.map(|_| ()) } => {
                info!("Shutdown signal received, stopping consumer");
                consumer.shutdown();
                (&mut runner).await
            }
        };

        // Consumer is stopped; stop the rest.
        stop_background.send_replace(true);
        for task in background {
            let _ = task.await;
        }
        self.release().await;

        match joined {
            Ok(result) => Ok(result?),
            Err(e) => {
                error!("Consumer task failed: {}", e);
                Err(WorkerError::TaskFailed(e.to_string()))
            }
        }
    }

    fn spawn_background(&self, stop_rx: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            self.registry.spawn_sweeper(stop_rx.clone()),
            self.cache.spawn_sweeper(stop_rx.clone()),
            spawn_monitor(
                Arc::clone(&self.registry),
                Some(self.cache.clone()),
                self.config.stats_interval,
                stop_rx.clone(),
            ),
        ]
    }

    /// Enqueue the first cleanup job now and keep repeating it.
    async fn schedule_cleanup(&self, stop_rx: &watch::Receiver<bool>) -> QueueResult<JoinHandle<()>> {
        info!(interval = ?self.config.cleanup_interval, "Scheduling repeat cleanup job");
        RepeatScheduler::new(Arc::clone(&self.registry), self.config.cleanup_interval)
            .start(|| QueueJob::CleanTempFiles(CleanupJob::now()), stop_rx.clone())
            .await
    }

    /// Close queue handles, then the pooled connection.
    async fn release(&self) {
        self.registry.close_all().await;
        if let Err(e) = self.registry.pool().shutdown().await {
            warn!("Failed to shut down connection pool: {}", e);
        }
        info!("Job executor stopped");
    }
}
