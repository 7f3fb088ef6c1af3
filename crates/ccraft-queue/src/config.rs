//! Queue-layer configuration.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

/// Shared broker connection settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the broker writes
    pub key_prefix: String,
    pub connect_timeout: Duration,
    /// Per-command response timeout
    pub command_timeout: Duration,
    /// Interval between keep-alive pings
    pub keep_alive: Duration,
    /// First reconnect delay; doubles per attempt
    pub reconnect_first_delay: Duration,
    /// Reconnect delay cap
    pub reconnect_max_delay: Duration,
    /// `None` retries forever
    pub reconnect_attempts: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "ccraft".to_string(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(120),
            reconnect_first_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(60),
            reconnect_attempts: None,
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            connect_timeout: env_secs("REDIS_CONNECT_TIMEOUT_SECS", 30),
            command_timeout: env_secs("REDIS_COMMAND_TIMEOUT_SECS", 30),
            keep_alive: env_secs("REDIS_KEEP_ALIVE_SECS", 120),
            ..defaults
        }
    }
}

/// Submission cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a fingerprint suppresses duplicate submissions
    pub ttl: Duration,
    /// Failed enqueue attempts before an entry is dropped
    pub max_attempts: u32,
    /// Batching window armed by the first submission
    pub batch_window: Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_attempts: 3,
            batch_window: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: env_secs("JOB_CACHE_TTL_SECS", 300),
            max_attempts: env_or("JOB_CACHE_MAX_ATTEMPTS", 3),
            batch_window: Duration::from_millis(env_or("JOB_BATCH_WINDOW_MS", 1000)),
            sweep_interval: env_secs("JOB_CACHE_SWEEP_SECS", 60),
        }
    }
}

/// Lazy queue registry settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Handles unused for longer than this are closed
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            idle_threshold: env_secs("QUEUE_IDLE_SECS", 600),
            sweep_interval: env_secs("QUEUE_SWEEP_SECS", 300),
        }
    }
}

/// Per-queue consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer name inside the queue's group
    pub consumer_name: String,
    /// Jobs executed at once. Every pipeline queue runs with 1.
    pub concurrency: usize,
    /// Sleep between empty polls
    pub poll_interval: Duration,
    /// How often stalled jobs are reclaimed
    pub reclaim_interval: Duration,
    /// Reservations idle longer than this are considered stalled
    pub stalled_threshold: Duration,
    /// How often a running job refreshes its reservation. Must stay well
    /// below `stalled_threshold`.
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for the running job
    pub shutdown_grace: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: default_consumer_name(),
            concurrency: 1,
            poll_interval: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(30),
            stalled_threshold: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(60),
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        Self {
            consumer_name: std::env::var("WORKER_ID").unwrap_or_else(|_| default_consumer_name()),
            concurrency: 1,
            poll_interval: Duration::from_millis(env_or("QUEUE_POLL_INTERVAL_MS", 1000)),
            reclaim_interval: env_secs("QUEUE_RECLAIM_INTERVAL_SECS", 30),
            stalled_threshold: env_secs("QUEUE_STALLED_SECS", 300),
            heartbeat_interval: env_secs("QUEUE_HEARTBEAT_SECS", 30),
            shutdown_grace: env_secs("WORKER_SHUTDOWN_GRACE_SECS", 60),
        }
    }
}

fn default_consumer_name() -> String {
    format!("worker-{}", std::process::id())
}
