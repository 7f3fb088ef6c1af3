//! Per-queue worker registration.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Reservation};
use crate::config::ConsumerConfig;
use crate::error::QueueResult;
use crate::job::{JobEnvelope, QueueName};
use crate::metrics;
use crate::retry::FailureTracker;

/// Why a job did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    /// `false` fails the job at once without spending its retry budget.
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Executes the jobs of one queue.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    fn queue(&self) -> QueueName;

    async fn process(&self, envelope: &JobEnvelope) -> Result<(), JobFailure>;
}

/// Pulls jobs for one queue and runs them through a [`JobProcessor`].
pub struct QueueConsumer {
    broker: Arc<dyn Broker>,
    processor: Arc<dyn JobProcessor>,
    config: ConsumerConfig,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl QueueConsumer {
    pub fn new(broker: Arc<dyn Broker>, processor: Arc<dyn JobProcessor>, config: ConsumerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            broker,
            processor,
            config,
            job_semaphore: Arc::new(Semaphore::new(concurrency)),
            shutdown,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.processor.queue()
    }

    /// Signal shutdown. `run` stops taking jobs and waits for the running ones.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Consume until shutdown.
    pub async fn run(&self) -> QueueResult<()> {
        let queue = self.queue();
        self.broker.ensure_queue(queue).await?;
        info!(
            queue = %queue,
            consumer = %self.config.consumer_name,
            concurrency = self.config.concurrency,
            "Starting queue consumer"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut backlog: VecDeque<Reservation> = VecDeque::new();
        let mut last_reclaim: Option<Instant> = None;
        let mut failures = FailureTracker::new(3);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = self.job_semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let reclaim_due = last_reclaim
                .map(|at| at.elapsed() >= self.config.reclaim_interval)
                .unwrap_or(true);
            if reclaim_due {
                last_reclaim = Some(Instant::now());
                match self
                    .broker
                    .reclaim_stalled(queue, &self.config.consumer_name, self.config.stalled_threshold)
                    .await
                {
                    Ok(reclaimed) => {
                        if !reclaimed.is_empty() {
                            info!(queue = %queue, count = reclaimed.len(), "Reclaimed stalled jobs");
                        }
                        backlog.extend(reclaimed);
                    }
                    Err(e) => warn!(queue = %queue, "Failed to reclaim stalled jobs: {}", e),
                }
            }

            let next = match backlog.pop_front() {
                Some(reservation) => Ok(Some(reservation)),
                None => self.next_reservation(queue).await,
            };

            match next {
                Ok(Some(reservation)) => {
                    failures.record_success();
                    self.spawn_job(reservation, permit);
                }
                Ok(None) => {
                    failures.record_success();
                    drop(permit);
                    self.idle(&mut shutdown_rx, self.config.poll_interval).await;
                }
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!(queue = %queue, "Error consuming jobs: {}", e);
                    }
                    self.idle(&mut shutdown_rx, self.config.poll_interval * 5).await;
                }
            }
        }

        info!(queue = %queue, "Waiting for in-flight jobs to complete...");
        let permits = self.config.concurrency.max(1) as u32;
        if tokio::time::timeout(
            self.config.shutdown_grace,
            self.job_semaphore.acquire_many(permits),
        )
        .await
        .is_err()
        {
            warn!(queue = %queue, "In-flight jobs still running after shutdown grace");
        }

        info!(queue = %queue, "Queue consumer stopped");
        Ok(())
    }

    async fn next_reservation(&self, queue: QueueName) -> QueueResult<Option<Reservation>> {
        self.broker.promote_delayed(queue).await?;
        self.broker.reserve(queue, &self.config.consumer_name).await
    }

    async fn idle(&self, shutdown_rx: &mut watch::Receiver<bool>, wait: Duration) {
        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    fn spawn_job(&self, reservation: Reservation, permit: OwnedSemaphorePermit) {
        let broker = Arc::clone(&self.broker);
        let processor = Arc::clone(&self.processor);
        let heartbeat = Heartbeat {
            consumer: self.config.consumer_name.clone(),
            every: self.config.heartbeat_interval,
        };
        tokio::spawn(async move {
            let _permit = permit;
            execute(broker, processor, reservation, heartbeat).await;
        });
    }
}

/// Who owns a running job and how often it refreshes its reservation.
struct Heartbeat {
    consumer: String,
    every: Duration,
}

/// Run one reservation and settle it on the broker.
///
/// The reservation is touched on every heartbeat while the processor runs,
/// so a long job is never reclaimed as stalled by another consumer.
async fn execute(
    broker: Arc<dyn Broker>,
    processor: Arc<dyn JobProcessor>,
    mut reservation: Reservation,
    heartbeat: Heartbeat,
) {
    let queue = reservation.envelope.queue;
    let job_id = reservation.envelope.id.clone();
    debug!(
        queue = %queue,
        job_id = %job_id,
        attempt = reservation.envelope.attempts_made + 1,
        "Executing job"
    );

    let result = {
        let every = heartbeat.every.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        let process = processor.process(&reservation.envelope);
        tokio::pin!(process);
        loop {
            tokio::select! {
                result = &mut process => break result,
                _ = ticker.tick() => {
                    if let Err(e) = broker.touch(&reservation, &heartbeat.consumer).await {
                        warn!(queue = %queue, job_id = %job_id, "Failed to refresh reservation: {}", e);
                    }
                }
            }
        }
    };

    let settled = match result {
        Ok(()) => {
            metrics::record_completed(queue);
            broker.complete(&reservation).await
        }
        Err(failure) if failure.retryable => match reservation.envelope.record_failure(&failure.message) {
            Some(delay) => {
                metrics::record_retried(queue);
                info!(
                    queue = %queue,
                    job_id = %job_id,
                    attempt = reservation.envelope.attempts_made,
                    max_attempts = reservation.envelope.options.attempts,
                    delay_secs = delay.as_secs(),
                    "Job failed, will retry: {}",
                    failure
                );
                broker.retry_later(&reservation, delay).await
            }
            None => {
                metrics::record_failed(queue);
                warn!(queue = %queue, job_id = %job_id, "Job exhausted its attempts: {}", failure);
                broker.fail(&reservation).await
            }
        },
        Err(failure) => {
            reservation.envelope.attempts_made += 1;
            reservation.envelope.last_error = Some(failure.message.clone());
            metrics::record_failed(queue);
            warn!(queue = %queue, job_id = %job_id, "Job failed permanently: {}", failure);
            broker.fail(&reservation).await
        }
    };

    if let Err(e) = settled {
        error!(queue = %queue, job_id = %job_id, "Failed to settle job: {}", e);
    }
}
