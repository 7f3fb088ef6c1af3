//! Job queue layer for the captioning pipeline.
//!
//! This crate provides:
//! - The broker contract with Redis Streams and in-memory implementations
//! - A process-wide connection pool with a construct-once guarantee
//! - A lazy queue registry that evicts idle handles
//! - A deduplicating, batching submission cache
//! - Per-queue consumers and fixed-interval repeat jobs

pub mod broker;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod redis_broker;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use broker::{Broker, ConnectionStatus, Connector, QueueCounts, Reservation};
pub use cache::{CacheStats, JobCache, JobSubmitter};
pub use config::{CacheConfig, ConsumerConfig, PoolConfig, RegistryConfig};
pub use consumer::{JobFailure, JobProcessor, QueueConsumer};
pub use error::{QueueError, QueueResult};
pub use job::{
    BurnInJob, CleanupJob, Fingerprint, JobEnvelope, JobHandle, JobOptions, QueueJob, QueueName,
    TranscribeJob,
};
pub use memory::{MemoryBroker, MemoryConnector};
pub use pool::{ConnectionPool, PoolStats};
pub use redis_broker::{RedisBroker, RedisConnector};
pub use registry::{QueueHandle, QueueRegistry, RegistryStats};
pub use retry::{Backoff, FailureTracker};
pub use scheduler::RepeatScheduler;
pub use stats::{spawn_monitor, OptimizationStats};
