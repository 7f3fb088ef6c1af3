//! Executor run loop and shutdown order.

mod common;

use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use ccraft_models::VideoId;
use ccraft_queue::{
    Broker, BurnInJob, ConsumerConfig, JobEnvelope, JobFailure, JobProcessor, QueueJob, QueueName,
};
use ccraft_worker::{CleanupProcessor, JobExecutor, WorkerConfig, WorkerError};

use common::Harness;

struct CountingProcessor {
    seen: AtomicUsize,
}

#[async_trait]
impl JobProcessor for CountingProcessor {
    fn queue(&self) -> QueueName {
        QueueName::BurnIn
    }

    async fn process(&self, _envelope: &JobEnvelope) -> Result<(), JobFailure> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        consumer_name: "test-worker".to_string(),
        poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(5),
        ..ConsumerConfig::default()
    }
}

fn worker_config(h: &Harness) -> WorkerConfig {
    WorkerConfig {
        temp_dir: h.temp_dir(),
        ..WorkerConfig::default()
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn executor_processes_jobs_and_releases_connections_on_shutdown() {
    let h = Harness::new();
    let processor = Arc::new(CountingProcessor {
        seen: AtomicUsize::new(0),
    });
    let executor = Arc::new(JobExecutor::new(
        worker_config(&h),
        consumer_config(),
        h.registry.clone(),
        h.cache.clone(),
    ));

    let runner = tokio::spawn({
        let executor = executor.clone();
        let processor = processor.clone();
        async move { executor.run(processor).await }
    });

    h.cache
        .submit(QueueJob::BurnIn(BurnInJob::new(VideoId::from("v1"))))
        .await
        .unwrap();
    wait_until(|| processor.seen.load(Ordering::SeqCst) == 1).await;

    executor.shutdown();
    runner.await.unwrap().unwrap();

    assert!(h.temp_dir().exists());
    assert_eq!(h.registry.stats().await.open_handles, 0);
    assert!(!h.registry.pool().stats().await.open);
    assert_eq!(h.broker.completed(QueueName::BurnIn).await.len(), 1);
    // Producer and consumer shared one connection.
    assert_eq!(h.connector.constructions(), 1);
}

#[tokio::test]
async fn cleanup_executor_schedules_its_own_sweeps() {
    let h = Harness::new();
    let config = worker_config(&h);
    std::fs::create_dir_all(&config.temp_dir).unwrap();
    let stale = config.temp_dir.join("v1_retry.mp4");
    File::create(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(3600))
        .unwrap();

    let processor = Arc::new(CleanupProcessor::new(
        config.temp_dir.clone(),
        config.cleanup_max_age,
    ));
    let executor = Arc::new(JobExecutor::new(
        config,
        consumer_config(),
        h.registry.clone(),
        h.cache.clone(),
    ));

    let runner = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(processor).await }
    });

    wait_until(|| !stale.exists()).await;
    executor.shutdown();
    runner.await.unwrap().unwrap();

    let scheduled = h.broker.added_to(QueueName::Cleanup).await;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].job.job_type(), "clean-temp-files");
}

#[tokio::test]
async fn cleanup_executor_fails_fast_when_first_schedule_fails() {
    let h = Harness::new();
    let config = worker_config(&h);
    let processor = Arc::new(CleanupProcessor::new(
        config.temp_dir.clone(),
        config.cleanup_max_age,
    ));
    h.registry.pool().acquire().await.unwrap();
    h.broker.close().await.unwrap();

    let executor = JobExecutor::new(config, consumer_config(), h.registry.clone(), h.cache.clone());
    let result = executor.run(processor).await;

    assert!(matches!(result, Err(WorkerError::Queue(_))));
    assert!(h.broker.added().await.is_empty());
    assert!(!h.registry.pool().stats().await.open);
}

#[tokio::test]
async fn shutdown_before_any_job_returns_cleanly() {
    let h = Harness::new();
    let executor = JobExecutor::new(
        worker_config(&h),
        consumer_config(),
        h.registry.clone(),
        h.cache.clone(),
    );

    executor.shutdown();
    let processor = Arc::new(CountingProcessor {
        seen: AtomicUsize::new(0),
    });
    executor.run(processor).await.unwrap();

    assert!(!h.registry.pool().stats().await.open);
}
