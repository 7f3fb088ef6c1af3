//! Process-wide shared broker connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::broker::{Broker, ConnectionStatus, Connector};
use crate::config::PoolConfig;
use crate::error::QueueResult;
use crate::metrics;
use crate::redis_broker::RedisConnector;

/// Snapshot of pool state.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub open: bool,
    pub status: ConnectionStatus,
    /// Total `acquire` calls since start or last shutdown
    pub acquisitions: u64,
}

/// Owns the single broker connection of a process.
///
/// Constructed once at startup and passed by reference to everything that
/// talks to the broker. The connection itself is built on the first
/// `acquire`; concurrent first calls wait on the same construction.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    slot: Mutex<Option<Arc<dyn Broker>>>,
    acquisitions: AtomicU64,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Pool over Redis.
    pub fn redis(config: PoolConfig) -> Self {
        Self::new(Arc::new(RedisConnector::new(config)))
    }

    /// Get the shared connection, constructing it on first use.
    pub async fn acquire(&self) -> QueueResult<Arc<dyn Broker>> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_acquire();

        // The lock is held across construction so racing callers share it.
        let mut slot = self.slot.lock().await;
        if let Some(broker) = slot.as_ref() {
            return Ok(Arc::clone(broker));
        }

        let broker = self.connector.connect().await?;
        info!("Broker connection constructed");
        *slot = Some(Arc::clone(&broker));
        Ok(broker)
    }

    pub async fn stats(&self) -> PoolStats {
        let slot = self.slot.lock().await;
        let status = slot
            .as_ref()
            .map(|b| b.status())
            .unwrap_or(ConnectionStatus::Closed);

        PoolStats {
            open: slot.is_some() && status != ConnectionStatus::Closed,
            status,
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
        }
    }

    /// Close the connection and reset the pool. Meant to run once at exit.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let broker = self.slot.lock().await.take();
        self.acquisitions.store(0, Ordering::Relaxed);

        if let Some(broker) = broker {
            broker.close().await?;
            info!("Broker connection pool shut down");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, MemoryConnector};
    use std::time::Duration;

    fn pool_with_delay(delay: Duration) -> (Arc<MemoryConnector>, ConnectionPool) {
        let connector =
            Arc::new(MemoryConnector::new(Arc::new(MemoryBroker::new())).with_connect_delay(delay));
        let pool = ConnectionPool::new(connector.clone());
        (connector, pool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_acquire_constructs_once() {
        let (connector, pool) = pool_with_delay(Duration::from_millis(50));
        let pool = Arc::new(pool);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(connector.constructions(), 1);
        assert_eq!(pool.stats().await.acquisitions, 8);
    }

    #[tokio::test]
    async fn test_acquire_returns_same_connection() {
        let (_, pool) = pool_with_delay(Duration::ZERO);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_shutdown_closes_and_resets() {
        let (connector, pool) = pool_with_delay(Duration::ZERO);
        let broker = pool.acquire().await.unwrap();
        broker.ping().await.unwrap();
        assert!(pool.stats().await.open);

        pool.shutdown().await.unwrap();
        assert_eq!(broker.status(), ConnectionStatus::Closed);

        let stats = pool.stats().await;
        assert!(!stats.open);
        assert_eq!(stats.acquisitions, 0);

        pool.acquire().await.unwrap();
        assert_eq!(connector.constructions(), 2);
    }
}
