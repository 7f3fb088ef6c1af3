//! Broker load statistics.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheStats, JobCache};
use crate::pool::{ConnectionPool, PoolStats};
use crate::registry::{QueueRegistry, RegistryStats};

/// Combined snapshot of the pool, registry and submission cache.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationStats {
    pub pool: PoolStats,
    pub registry: RegistryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub timestamp: DateTime<Utc>,
}

impl OptimizationStats {
    pub async fn collect(pool: &ConnectionPool, registry: &QueueRegistry, cache: Option<&JobCache>) -> Self {
        let cache = match cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        };
        Self {
            pool: pool.stats().await,
            registry: registry.stats().await,
            cache,
            timestamp: Utc::now(),
        }
    }

    /// Log the snapshot as one structured line.
    pub fn log(&self) {
        let cache = self.cache.as_ref();
        info!(
            pool_open = self.pool.open,
            pool_acquisitions = self.pool.acquisitions,
            open_queues = self.registry.open_handles,
            cache_entries = cache.map(|c| c.entries).unwrap_or(0),
            cache_deduplicated = cache.map(|c| c.deduplicated).unwrap_or(0),
            "Broker optimization stats"
        );
    }
}

/// Log stats every `interval` until shutdown.
pub fn spawn_monitor(
    registry: Arc<QueueRegistry>,
    cache: Option<JobCache>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    OptimizationStats::collect(registry.pool(), &registry, cache.as_ref())
                        .await
                        .log();
                }
            }
        }
    })
}
