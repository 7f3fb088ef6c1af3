//! Broker contract shared by the Redis and in-memory implementations.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueResult;
use crate::job::{JobEnvelope, QueueName};

/// State of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Constructed, no command issued yet
    Idle,
    Open,
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Idle,
            1 => ConnectionStatus::Open,
            _ => ConnectionStatus::Closed,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionStatus::Idle => 0,
            ConnectionStatus::Open => 1,
            ConnectionStatus::Closed => 2,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job reserved by one consumer. Only that consumer may settle it.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// Broker-side delivery id (stream entry id for Redis)
    pub receipt: String,
    pub envelope: JobEnvelope,
}

/// Job counts for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Waiting or reserved
    pub waiting: u64,
    /// Scheduled for a later retry
    pub delayed: u64,
    /// Retained completed jobs
    pub completed: u64,
    /// Retained failed jobs
    pub failed: u64,
}

/// Durable job queue primitive.
///
/// The broker does not deduplicate; callers that need it go through
/// [`crate::JobCache`].
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the queue and its consumer group if missing.
    async fn ensure_queue(&self, queue: QueueName) -> QueueResult<()>;

    /// Append a job to its queue.
    async fn add(&self, envelope: &JobEnvelope) -> QueueResult<()>;

    /// Reserve the next waiting job for `consumer`, if any.
    async fn reserve(&self, queue: QueueName, consumer: &str) -> QueueResult<Option<Reservation>>;

    /// Settle a reservation as completed, keeping `remove_on_complete` jobs.
    async fn complete(&self, reservation: &Reservation) -> QueueResult<()>;

    /// Settle a reservation and schedule its envelope to run again after `delay`.
    async fn retry_later(&self, reservation: &Reservation, delay: Duration) -> QueueResult<()>;

    /// Settle a reservation as terminally failed, keeping `remove_on_fail` jobs.
    async fn fail(&self, reservation: &Reservation) -> QueueResult<()>;

    /// Move delayed jobs whose time has come back to waiting. Returns the count.
    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<usize>;

    /// Reset the idle time of a reservation still being worked on by
    /// `consumer`, so `reclaim_stalled` leaves it alone.
    async fn touch(&self, reservation: &Reservation, consumer: &str) -> QueueResult<()>;

    /// Take over reservations idle for at least `min_idle`.
    async fn reclaim_stalled(
        &self,
        queue: QueueName,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Reservation>>;

    /// Acquire a named lease for `ttl`. Returns `false` if someone else holds it.
    async fn acquire_lease(&self, key: &str, ttl: Duration) -> QueueResult<bool>;

    async fn counts(&self, queue: QueueName) -> QueueResult<QueueCounts>;

    async fn ping(&self) -> QueueResult<()>;

    /// Close the connection. Every later command fails.
    async fn close(&self) -> QueueResult<()>;

    fn status(&self) -> ConnectionStatus;
}

/// Builds the broker connection for a [`crate::ConnectionPool`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> QueueResult<Arc<dyn Broker>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_u8() {
        for status in [
            ConnectionStatus::Idle,
            ConnectionStatus::Open,
            ConnectionStatus::Closed,
        ] {
            assert_eq!(ConnectionStatus::from_u8(status.as_u8()), status);
        }
    }
}
