//! Process-local broker.
//!
//! Same semantics as the Redis broker, without durability. Used for local
//! runs and by tests, which read its counters to assert on broker traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use ccraft_models::VideoId;

use crate::broker::{Broker, ConnectionStatus, Connector, QueueCounts, Reservation};
use crate::error::{QueueError, QueueResult};
use crate::job::{JobEnvelope, QueueName};

struct Reserved {
    consumer: String,
    since: Instant,
    envelope: JobEnvelope,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<JobEnvelope>,
    delayed: Vec<(Instant, JobEnvelope)>,
    reserved: HashMap<String, Reserved>,
    completed: VecDeque<JobEnvelope>,
    failed: VecDeque<JobEnvelope>,
}

#[derive(Default)]
struct State {
    queues: HashMap<QueueName, QueueState>,
    leases: HashMap<String, Instant>,
    /// Every envelope ever accepted by `add`, in order
    history: Vec<JobEnvelope>,
    /// `add` fails for jobs about these videos
    rejected: HashSet<VideoId>,
}

/// In-memory [`Broker`].
pub struct MemoryBroker {
    state: Mutex<State>,
    status: AtomicU8,
    add_calls: AtomicUsize,
    next_receipt: AtomicU64,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            status: AtomicU8::new(ConnectionStatus::Idle.as_u8()),
            add_calls: AtomicUsize::new(0),
            next_receipt: AtomicU64::new(1),
        }
    }

    /// Number of `add` calls, including rejected ones.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Envelopes accepted so far, oldest first.
    pub async fn added(&self) -> Vec<JobEnvelope> {
        self.state.lock().await.history.clone()
    }

    /// Envelopes accepted for one queue, oldest first.
    pub async fn added_to(&self, queue: QueueName) -> Vec<JobEnvelope> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|e| e.queue == queue)
            .cloned()
            .collect()
    }

    /// Make every later `add` of a job for `video_id` fail.
    pub async fn reject_jobs_for(&self, video_id: VideoId) {
        self.state.lock().await.rejected.insert(video_id);
    }

    /// Retained completed jobs, newest first.
    pub async fn completed(&self, queue: QueueName) -> Vec<JobEnvelope> {
        let state = self.state.lock().await;
        state
            .queues
            .get(&queue)
            .map(|q| q.completed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Retained failed jobs, newest first.
    pub async fn failed(&self, queue: QueueName) -> Vec<JobEnvelope> {
        let state = self.state.lock().await;
        state
            .queues
            .get(&queue)
            .map(|q| q.failed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Delayed jobs with their remaining delay.
    pub async fn delayed(&self, queue: QueueName) -> Vec<(Duration, JobEnvelope)> {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .queues
            .get(&queue)
            .map(|q| {
                q.delayed
                    .iter()
                    .map(|(due, e)| (due.saturating_duration_since(now), e.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn reopen(&self) {
        self.status
            .store(ConnectionStatus::Idle.as_u8(), Ordering::SeqCst);
    }

    fn check_open(&self) -> QueueResult<()> {
        match self.status() {
            ConnectionStatus::Closed => Err(QueueError::closed("memory broker")),
            ConnectionStatus::Idle => {
                self.status
                    .store(ConnectionStatus::Open.as_u8(), Ordering::SeqCst);
                Ok(())
            }
            ConnectionStatus::Open => Ok(()),
        }
    }

    fn receipt(&self) -> String {
        format!("{}-0", self.next_receipt.fetch_add(1, Ordering::SeqCst))
    }

    fn retain(list: &mut VecDeque<JobEnvelope>, envelope: JobEnvelope, keep: usize) {
        if keep == 0 {
            return;
        }
        list.push_front(envelope);
        list.truncate(keep);
    }

    fn take_reserved(state: &mut State, reservation: &Reservation) -> QueueResult<JobEnvelope> {
        let queue = reservation.envelope.queue;
        state
            .queues
            .get_mut(&queue)
            .and_then(|q| q.reserved.remove(&reservation.receipt))
            .map(|_| reservation.envelope.clone())
            .ok_or_else(|| QueueError::JobNotFound(reservation.receipt.clone()))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_queue(&self, queue: QueueName) -> QueueResult<()> {
        self.check_open()?;
        self.state.lock().await.queues.entry(queue).or_default();
        Ok(())
    }

    async fn add(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;

        let mut state = self.state.lock().await;
        if let Some(video_id) = envelope.job.video_id() {
            if state.rejected.contains(video_id) {
                return Err(QueueError::enqueue_failed(format!(
                    "rejected job for video {}",
                    video_id
                )));
            }
        }

        state
            .queues
            .entry(envelope.queue)
            .or_default()
            .waiting
            .push_back(envelope.clone());
        state.history.push(envelope.clone());
        debug!(queue = %envelope.queue, job_id = %envelope.id, "Added job");
        Ok(())
    }

    async fn reserve(&self, queue: QueueName, consumer: &str) -> QueueResult<Option<Reservation>> {
        self.check_open()?;
        let receipt = self.receipt();

        let mut state = self.state.lock().await;
        let Some(q) = state.queues.get_mut(&queue) else {
            return Ok(None);
        };
        let Some(envelope) = q.waiting.pop_front() else {
            return Ok(None);
        };

        q.reserved.insert(
            receipt.clone(),
            Reserved {
                consumer: consumer.to_string(),
                since: Instant::now(),
                envelope: envelope.clone(),
            },
        );
        Ok(Some(Reservation { receipt, envelope }))
    }

    async fn complete(&self, reservation: &Reservation) -> QueueResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let envelope = Self::take_reserved(&mut state, reservation)?;
        let keep = envelope.options.remove_on_complete;
        if let Some(q) = state.queues.get_mut(&envelope.queue) {
            Self::retain(&mut q.completed, envelope, keep);
        }
        Ok(())
    }

    async fn retry_later(&self, reservation: &Reservation, delay: Duration) -> QueueResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let envelope = Self::take_reserved(&mut state, reservation)?;
        if let Some(q) = state.queues.get_mut(&envelope.queue) {
            q.delayed.push((Instant::now() + delay, envelope));
        }
        Ok(())
    }

    async fn fail(&self, reservation: &Reservation) -> QueueResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let envelope = Self::take_reserved(&mut state, reservation)?;
        let keep = envelope.options.remove_on_fail;
        if let Some(q) = state.queues.get_mut(&envelope.queue) {
            Self::retain(&mut q.failed, envelope, keep);
        }
        Ok(())
    }

    async fn promote_delayed(&self, queue: QueueName) -> QueueResult<usize> {
        self.check_open()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(q) = state.queues.get_mut(&queue) else {
            return Ok(0);
        };

        let (due, pending): (Vec<_>, Vec<_>) = q.delayed.drain(..).partition(|(at, _)| *at <= now);
        q.delayed = pending;
        let promoted = due.len();
        q.waiting.extend(due.into_iter().map(|(_, e)| e));
        Ok(promoted)
    }

    async fn touch(&self, reservation: &Reservation, consumer: &str) -> QueueResult<()> {
        self.check_open()?;
        let mut state = self.state.lock().await;
        let reserved = state
            .queues
            .get_mut(&reservation.envelope.queue)
            .and_then(|q| q.reserved.get_mut(&reservation.receipt))
            .ok_or_else(|| QueueError::JobNotFound(reservation.receipt.clone()))?;
        reserved.consumer = consumer.to_string();
        reserved.since = Instant::now();
        Ok(())
    }

    async fn reclaim_stalled(
        &self,
        queue: QueueName,
        consumer: &str,
        min_idle: Duration,
    ) -> QueueResult<Vec<Reservation>> {
        self.check_open()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(q) = state.queues.get_mut(&queue) else {
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for (receipt, reserved) in q.reserved.iter_mut() {
            if now.saturating_duration_since(reserved.since) >= min_idle {
                reserved.consumer = consumer.to_string();
                reserved.since = now;
                claimed.push(Reservation {
                    receipt: receipt.clone(),
                    envelope: reserved.envelope.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn acquire_lease(&self, key: &str, ttl: Duration) -> QueueResult<bool> {
        self.check_open()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.leases.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                state.leases.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<QueueCounts> {
        self.check_open()?;
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(&queue)
            .map(|q| QueueCounts {
                waiting: (q.waiting.len() + q.reserved.len()) as u64,
                delayed: q.delayed.len() as u64,
                completed: q.completed.len() as u64,
                failed: q.failed.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check_open()
    }

    async fn close(&self) -> QueueResult<()> {
        self.status
            .store(ConnectionStatus::Closed.as_u8(), Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }
}

/// [`Connector`] handing out one shared [`MemoryBroker`].
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
    connect_delay: Duration,
    constructions: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connect_delay: Duration::ZERO,
            constructions: AtomicUsize::new(0),
        }
    }

    /// Simulate a slow handshake.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// How many connections have been constructed.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> QueueResult<Arc<dyn Broker>> {
        self.constructions.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.broker.reopen();
        let broker: Arc<dyn Broker> = self.broker.clone();
        Ok(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BurnInJob, QueueJob};

    fn burn_in(video: &str) -> JobEnvelope {
        let job = QueueJob::BurnIn(BurnInJob::new(VideoId::from(video)));
        JobEnvelope::new(job, QueueName::BurnIn.default_options())
    }

    #[tokio::test]
    async fn test_reserve_is_fifo_and_exclusive() {
        let broker = MemoryBroker::new();
        broker.add(&burn_in("v1")).await.unwrap();
        broker.add(&burn_in("v2")).await.unwrap();

        let first = broker.reserve(QueueName::BurnIn, "a").await.unwrap().unwrap();
        let second = broker.reserve(QueueName::BurnIn, "b").await.unwrap().unwrap();
        assert_eq!(first.envelope.job.video_id().unwrap().as_str(), "v1");
        assert_eq!(second.envelope.job.video_id().unwrap().as_str(), "v2");
        assert!(broker.reserve(QueueName::BurnIn, "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_keeps_most_recent() {
        let broker = MemoryBroker::new();
        for video in ["v1", "v2", "v3"] {
            broker.add(&burn_in(video)).await.unwrap();
            let reservation = broker.reserve(QueueName::BurnIn, "a").await.unwrap().unwrap();
            broker.complete(&reservation).await.unwrap();
        }

        let completed = broker.completed(QueueName::BurnIn).await;
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].job.video_id().unwrap().as_str(), "v3");
    }

    #[tokio::test]
    async fn test_settling_twice_fails() {
        let broker = MemoryBroker::new();
        broker.add(&burn_in("v1")).await.unwrap();
        let reservation = broker.reserve(QueueName::BurnIn, "a").await.unwrap().unwrap();

        broker.complete(&reservation).await.unwrap();
        assert!(matches!(
            broker.fail(&reservation).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_jobs_promote_when_due() {
        let broker = MemoryBroker::new();
        broker.add(&burn_in("v1")).await.unwrap();
        let reservation = broker.reserve(QueueName::BurnIn, "a").await.unwrap().unwrap();
        broker
            .retry_later(&reservation, Duration::from_secs(15))
            .await
            .unwrap();

        assert_eq!(broker.promote_delayed(QueueName::BurnIn).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(broker.promote_delayed(QueueName::BurnIn).await.unwrap(), 1);
        assert!(broker.reserve(QueueName::BurnIn, "a").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclaims_only_stalled_reservations() {
        let broker = MemoryBroker::new();
        broker.add(&burn_in("v1")).await.unwrap();
        broker.reserve(QueueName::BurnIn, "crashed").await.unwrap().unwrap();

        let threshold = Duration::from_secs(300);
        let early = broker
            .reclaim_stalled(QueueName::BurnIn, "b", threshold)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(threshold).await;
        let claimed = broker
            .reclaim_stalled(QueueName::BurnIn, "b", threshold)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_is_exclusive_until_expiry() {
        let broker = MemoryBroker::new();
        let ttl = Duration::from_secs(60);

        assert!(broker.acquire_lease("tick", ttl).await.unwrap());
        assert!(!broker.acquire_lease("tick", ttl).await.unwrap());
        tokio::time::advance(ttl).await;
        assert!(broker.acquire_lease("tick", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_broker_rejects_commands() {
        let broker = MemoryBroker::new();
        broker.close().await.unwrap();
        assert_eq!(broker.status(), ConnectionStatus::Closed);
        assert!(matches!(broker.ping().await, Err(QueueError::Closed(_))));
    }
}
