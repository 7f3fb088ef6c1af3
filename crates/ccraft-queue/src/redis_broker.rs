//! Broker over Redis Streams.
//!
//! Layout per queue (`<prefix>:<queue>`):
//! - the stream itself, read through the `<prefix>:<queue>:workers` group
//! - `:delayed` sorted set of envelopes scored by due time (ms)
//! - `:completed` / `:failed` capped lists of retained envelopes
//!
//! Consumers poll without `BLOCK`: the connection is shared by every queue
//! handle in the process and a blocking read would stall all of them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

use crate::broker::{Broker, ConnectionStatus, Connector, QueueCounts, Reservation};
use crate::config::PoolConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{JobEnvelope, QueueName};
use crate::retry::{reconnect_delay, FailureTracker};

const RECLAIM_BATCH: usize = 10;

/// Redis Streams [`Broker`].
pub struct RedisBroker {
    client: redis::Client,
    config: PoolConfig,
    conn: OnceCell<ConnectionManager>,
    status: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl RedisBroker {
    /// Validate the URL. No connection is made until the first command.
    pub fn new(config: PoolConfig) -> QueueResult<Self> {
        url::Url::parse(&config.redis_url)
            .map_err(|e| QueueError::config(format!("invalid REDIS_URL: {}", e)))?;
        let client = redis::Client::open(config.redis_url.as_str())?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            client,
            config,
            conn: OnceCell::new(),
            status: AtomicU8::new(ConnectionStatus::Idle.as_u8()),
            shutdown,
        })
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        // Reconnect delays are factor * 2^n ms, so the first is 2 * factor.
        let factor = (self.config.reconnect_first_delay.as_millis() / 2).max(1) as u64;
        ConnectionManagerConfig::new()
            .set_exponent_base(2)
            .set_factor(factor)
            .set_max_delay(self.config.reconnect_max_delay.as_millis() as u64)
            .set_number_of_retries(self.config.reconnect_attempts.unwrap_or(usize::MAX))
            .set_connection_timeout(self.config.connect_timeout)
            .set_response_timeout(self.config.command_timeout)
    }

    async fn conn(&self) -> QueueResult<ConnectionManager> {
        if self.status() == ConnectionStatus::Closed {
            return Err(QueueError::closed("redis broker"));
        }

        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager =
                    ConnectionManager::new_with_config(self.client.clone(), self.manager_config())
                        .await
                        .map_err(|e| QueueError::connection_failed(e.to_string()))?;
                self.status
                    .store(ConnectionStatus::Open.as_u8(), Ordering::SeqCst);
                info!("Connected to Redis");
                self.spawn_keep_alive(manager.clone());
                Ok::<_, QueueError>(manager)
            })
            .await?;

        Ok(conn.clone())
    }

    fn spawn_keep_alive(&self, mut conn: ConnectionManager) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval = self.config.keep_alive;
        let first_delay = self.config.reconnect_first_delay;
        let max_delay = self.config.reconnect_max_delay;

        tokio::spawn(async move {
            let mut tracker = FailureTracker::new(3);
            let mut wait = interval;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                match redis::cmd("PING").query_async::<String>(&mut conn).await {
                    Ok(_) => {
                        tracker.record_success();
                        wait = interval;
                    }
                    Err(e) => {
                        if tracker.record_failure() {
                            warn!("Redis keep-alive failed: {}", e);
                        }
                        wait = reconnect_delay(tracker.failure_count(), first_delay, max_delay);
                    }
                }
            }
            debug!("Redis keep-alive stopped");
        });
    }

    fn stream_key(&self, queue: QueueName) -> String {
        format!("{}:{}", self.config.key_prefix, queue)
    }

    fn group_name(&self, queue: QueueName) -> String {
        format!("{}:{}:workers", self.config.key_prefix, queue)
    }

    fn delayed_key(&self, queue: QueueName) -> String {
        format!("{}:{}:delayed", self.config.key_prefix, queue)
    }

    fn completed_key(&self, queue: QueueName) -> String {
        format!("{}:{}:completed", self.config.key_prefix, queue)
    }

    fn failed_key(&self, queue: QueueName) -> String {
        format!("{}:{}:failed", self.config.key_prefix, queue)
    }

    fn lease_key(&self, key: &str) -> String {
        format!("{}:lease:{}", self.config.key_prefix, key)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Parse a stream entry, dropping it from the stream if it is malformed.
    async fn parse_entry(&self, queue: QueueName, entry: &StreamId) -> QueueResult<Option<Reservation>> {
        let parsed = entry
            .get::<String>("job")
            .map(|payload| serde_json::from_str::<JobEnvelope>(&payload));

        match parsed {
            Some(Ok(envelope)) => Ok(Some(Reservation {
                receipt: entry.id.clone(),
                envelope,
            })),
            Some(Err(e)) => {
                warn!(queue = %queue, entry = %entry.id, "Dropping malformed job payload: {}", e);
                self.settle(queue, &entry.id).await?;
                Ok(None)
            }
            None => {
                warn!(queue = %queue, entry = %entry.id, "Dropping stream entry without job field");
                self.settle(queue, &entry.id).await?;
                Ok(None)
            }
        }
    }

    /// Acknowledge and delete a stream entry.
    async fn settle(&self, queue: QueueName, receipt: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg(receipt)
            .ignore()
            .cmd("XDEL")
            .arg(self.stream_key(queue))
            .arg(receipt)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Settle and push the envelope onto a capped retention list.
    async fn settle_into(&self, reservation: &Reservation, list_key: String, keep: usize) -> QueueResult<()> {
        let queue = reservation.envelope.queue;
        let payload = serde_json::to_string(&reservation.envelope)?;
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XACK")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg(&reservation.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(self.stream_key(queue))
            .arg(&reservation.receipt)
            .ignore();
        if keep > 0 {
            pipe.cmd("LPUSH")
                .arg(&list_key)
                .arg(&payload)
                .ignore()
                .cmd("LTRIM")
                .arg(&list_key)
                .arg(0)
                .arg(keep as i64 - 1)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ensure_queue(&self, queue: QueueName) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let group = self.group_name(queue);

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.stream_key(queue))
            .arg(&group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }
        Ok(())
    }

    async fn add(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(envelope)?;

        let entry_id: String = redis::cmd("XADD")
            .arg(self.stream_key(envelope.queue))
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        debug!(queue = %envelope.queue, job_id = %envelope.id, entry = %entry_id, "Added job");
        Ok(())
    }

    async fn reserve(&self, queue: QueueName, consumer: &str) -> QueueResult<Option<Reservation>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(self.group_name(queue))
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(self.stream_key(queue))
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::dequeue_failed(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream in reply.keys {
            for entry in stream.ids {
                if let Some(reservation) = self.parse_entry(queue, &entry).await? {
                    return Ok(Some(reservation));
                }
            }
        }
        Ok(None)
    }

    async fn complete(&self, reservation: &Reservation) -> QueueResult<()> {
        let key = self.completed_key(reservation.envelope.queue);
        let keep = reservation.envelope.options.remove_on_complete;
        self.settle_into(reservation, key, keep).await
    }

    async fn retry_later(&self, reservation: &Reservation, delay: Duration) -> QueueResult<()> {
        let queue = reservation.envelope.queue;
        let payload = serde_json::to_string(&reservation.envelope)?;
        let due = Self::now_ms() + delay.as_millis() as i64;
        let mut conn = self.conn().await?;

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg(&reservation.receipt)
            .ignore()
            .cmd("XDEL")
            .arg(self.stream_key(queue))
            .arg(&reservation.receipt)
            .ignore()
            .cmd("ZADD")
            .arg(self.delayed_key(queue))
            .arg(due)
            .arg(&payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, reservation: &Reservation) -> QueueResult<()> {
        let key = self.failed_key(reservation.envelope.queue);
        let keep = reservation.envelope.options.remove_on_fail;
        self.settle_into(reservation, key, keep).await
    }

    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let delayed_key = self.delayed_key(queue);

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&delayed_key)
            .arg("-inf")
            .arg(Self::now_ms())
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for payload in due {
            // Only the process that removes the member re-adds it.
            let removed: i64 = redis::cmd("ZREM")
                .arg(&delayed_key)
                .arg(&payload)
                .query_async(&mut conn)
                .await?;
            if removed == 0 {
                continue;
            }

            redis::cmd("XADD")
                .arg(self.stream_key(queue))
                .arg("*")
                .arg("job")
                .arg(&payload)
                .query_async::<String>(&mut conn)
                .await?;
            promoted += 1;
        }

        if promoted > 0 {
            debug!(queue = %queue, promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn touch(&self, reservation: &Reservation, consumer: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let queue = reservation.envelope.queue;

        // Claiming with min-idle 0 to the current owner resets the idle time.
        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg(consumer)
            .arg(0)
            .arg(&reservation.receipt)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if claimed.is_empty() {
            return Err(QueueError::JobNotFound(reservation.receipt.clone()));
        }
        Ok(())
    }

    async fn reclaim_stalled(
        &self,
        queue: QueueName,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Reservation>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH)
            .query_async(&mut conn)
            .await?;

        let stalled: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| p.id)
            .collect();
        if stalled.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(self.stream_key(queue))
            .arg(self.group_name(queue))
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&stalled)
            .query_async(&mut conn)
            .await?;

        let mut reservations = Vec::new();
        for entry in &claimed.ids {
            if let Some(reservation) = self.parse_entry(queue, entry).await? {
                info!(queue = %queue, job_id = %reservation.envelope.id, "Reclaimed stalled job");
                reservations.push(reservation);
            }
        }
        Ok(reservations)
    }

    async fn acquire_lease(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(key))
            .arg(std::process::id())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<QueueCounts> {
        let mut conn = self.conn().await?;
        let (waiting, delayed, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .cmd("XLEN")
            .arg(self.stream_key(queue))
            .cmd("ZCARD")
            .arg(self.delayed_key(queue))
            .cmd("LLEN")
            .arg(self.completed_key(queue))
            .cmd("LLEN")
            .arg(self.failed_key(queue))
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts {
            waiting,
            delayed,
            completed,
            failed,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        self.status
            .store(ConnectionStatus::Closed.as_u8(), Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        info!("Redis connection closed");
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }
}

/// [`Connector`] building a lazily connecting [`RedisBroker`].
pub struct RedisConnector {
    config: PoolConfig,
}

impl RedisConnector {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> QueueResult<Arc<dyn Broker>> {
        let broker: Arc<dyn Broker> = Arc::new(RedisBroker::new(self.config.clone())?);
        Ok(broker)
    }
}
