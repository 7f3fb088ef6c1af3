//! Producer and consumer sides sharing one pooled in-memory broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccraft_models::VideoId;
use ccraft_queue::{
    CacheConfig, ConnectionPool, ConsumerConfig, JobCache, JobEnvelope, JobFailure, JobProcessor,
    MemoryBroker, MemoryConnector, QueueConsumer, QueueJob, QueueName, QueueRegistry,
    RegistryConfig, TranscribeJob,
};

struct CountingProcessor {
    seen: AtomicUsize,
}

#[async_trait]
impl JobProcessor for CountingProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Transcription
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<(), JobFailure> {
        assert!(matches!(envelope.job, QueueJob::Transcribe(_)));
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn setup() -> (Arc<MemoryBroker>, Arc<MemoryConnector>, Arc<QueueRegistry>) {
    let broker = Arc::new(MemoryBroker::new());
    let connector = Arc::new(MemoryConnector::new(broker.clone()));
    let pool = Arc::new(ConnectionPool::new(connector.clone()));
    let registry = Arc::new(QueueRegistry::new(pool, RegistryConfig::default()));
    (broker, connector, registry)
}

#[tokio::test(start_paused = true)]
async fn test_submitted_jobs_are_consumed_once() {
    let (broker, connector, registry) = setup();
    let cache = JobCache::new(registry.clone(), CacheConfig::default());

    let submissions = ["v1", "v2", "v1"].map(|v| {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .submit(QueueJob::Transcribe(TranscribeJob::new(VideoId::from(v), None)))
                .await
        })
    });
    for submission in submissions {
        submission.await.unwrap().unwrap();
    }
    assert_eq!(broker.add_calls(), 2);

    let processor = Arc::new(CountingProcessor {
        seen: AtomicUsize::new(0),
    });
    let consumer = Arc::new(QueueConsumer::new(
        registry.pool().acquire().await.unwrap(),
        processor.clone(),
        ConsumerConfig {
            consumer_name: "it".to_string(),
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        },
    ));
    let runner = tokio::spawn({
        let consumer = consumer.clone();
        async move { consumer.run().await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    consumer.shutdown();
    runner.await.unwrap().unwrap();

    assert_eq!(processor.seen.load(Ordering::SeqCst), 2);
    // Producer and consumer shared one connection.
    assert_eq!(connector.constructions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_order_closes_handles_then_connection() {
    let (broker, _, registry) = setup();
    let handle = registry.get_queue(QueueName::BurnIn).await.unwrap();

    assert_eq!(registry.close_all().await, 1);
    assert!(handle.is_closed());
    registry.pool().shutdown().await.unwrap();

    assert!(!registry.pool().stats().await.open);
    assert_eq!(ccraft_queue::Broker::status(broker.as_ref()), ccraft_queue::ConnectionStatus::Closed);
}
