//! Job types for the queue.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use ccraft_models::{JobId, VideoId};

use crate::error::{QueueError, QueueResult};
use crate::retry::Backoff;

/// The pipeline's queues. Each is consumed by its own worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "transcription-queue")]
    Transcription,
    #[serde(rename = "burn-in-queue")]
    BurnIn,
    #[serde(rename = "cleanup-queue")]
    Cleanup,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Transcription, QueueName::BurnIn, QueueName::Cleanup];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Transcription => "transcription-queue",
            QueueName::BurnIn => "burn-in-queue",
            QueueName::Cleanup => "cleanup-queue",
        }
    }

    /// Default enqueue options for jobs on this queue.
    pub fn default_options(&self) -> JobOptions {
        match self {
            QueueName::Transcription => JobOptions {
                attempts: 3,
                backoff: Backoff::exponential(Duration::from_secs(10)),
                remove_on_complete: 1,
                remove_on_fail: 5,
            },
            QueueName::BurnIn => JobOptions {
                attempts: 2,
                backoff: Backoff::exponential(Duration::from_secs(15)),
                remove_on_complete: 1,
                remove_on_fail: 5,
            },
            QueueName::Cleanup => JobOptions {
                attempts: 2,
                backoff: Backoff::exponential(Duration::from_secs(5)),
                remove_on_complete: 1,
                remove_on_fail: 1,
            },
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| QueueError::config(format!("unknown queue: {}", s)))
    }
}

/// Transcribe an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscribeJob {
    pub video_id: VideoId,
    /// Local upload path. Absent on retries; the worker downloads the
    /// stored original instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl TranscribeJob {
    pub fn new(video_id: VideoId, file_path: Option<PathBuf>) -> Self {
        Self { video_id, file_path }
    }
}

/// Burn captions into a transcribed video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnInJob {
    pub video_id: VideoId,
}

impl BurnInJob {
    pub fn new(video_id: VideoId) -> Self {
        Self { video_id }
    }
}

/// Sweep the shared temp directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupJob {
    pub timestamp: DateTime<Utc>,
}

impl CleanupJob {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

/// Generic job wrapper for queue storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum QueueJob {
    #[serde(rename = "transcribe")]
    Transcribe(TranscribeJob),
    #[serde(rename = "burn-in")]
    BurnIn(BurnInJob),
    #[serde(rename = "clean-temp-files")]
    CleanTempFiles(CleanupJob),
}

impl QueueJob {
    /// Queue this job belongs on.
    pub fn queue(&self) -> QueueName {
        match self {
            QueueJob::Transcribe(_) => QueueName::Transcription,
            QueueJob::BurnIn(_) => QueueName::BurnIn,
            QueueJob::CleanTempFiles(_) => QueueName::Cleanup,
        }
    }

    pub fn job_type(&self) -> &'static str {
        match self {
            QueueJob::Transcribe(_) => "transcribe",
            QueueJob::BurnIn(_) => "burn-in",
            QueueJob::CleanTempFiles(_) => "clean-temp-files",
        }
    }

    /// Returns the video_id if applicable.
    pub fn video_id(&self) -> Option<&VideoId> {
        match self {
            QueueJob::Transcribe(j) => Some(&j.video_id),
            QueueJob::BurnIn(j) => Some(&j.video_id),
            QueueJob::CleanTempFiles(_) => None,
        }
    }

    fn payload_bytes(&self) -> QueueResult<Vec<u8>> {
        let bytes = match self {
            QueueJob::Transcribe(j) => serde_json::to_vec(j)?,
            QueueJob::BurnIn(j) => serde_json::to_vec(j)?,
            QueueJob::CleanTempFiles(j) => serde_json::to_vec(j)?,
        };
        Ok(bytes)
    }
}

/// Deterministic hash of a job's type and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a job. Equal `(job type, payload)` pairs always hash equal.
    pub fn of(job: &QueueJob) -> QueueResult<Self> {
        let mut hasher = Sha256::new();
        hasher.update(job.job_type().as_bytes());
        hasher.update(b":");
        hasher.update(job.payload_bytes()?);
        let digest = hasher.finalize();

        let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
        Ok(Self(format!("job_{}", hex)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-job broker options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts including the first run
    pub attempts: u32,
    /// Delay schedule between attempts
    pub backoff: Backoff,
    /// Completed jobs retained per queue
    pub remove_on_complete: usize,
    /// Failed jobs retained per queue
    pub remove_on_fail: usize,
}

/// Job as stored on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: JobId,
    pub queue: QueueName,
    pub job: QueueJob,
    /// Attempts already run to completion or failure
    #[serde(default)]
    pub attempts_made: u32,
    pub options: JobOptions,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobEnvelope {
    pub fn new(job: QueueJob, options: JobOptions) -> Self {
        Self {
            id: JobId::new(),
            queue: job.queue(),
            job,
            attempts_made: 0,
            options,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn job_type(&self) -> &'static str {
        self.job.job_type()
    }

    /// Record a failed attempt. Returns the retry delay if attempts remain.
    pub fn record_failure(&mut self, error: impl Into<String>) -> Option<Duration> {
        self.attempts_made += 1;
        self.last_error = Some(error.into());

        if self.attempts_made < self.options.attempts {
            Some(self.options.backoff.delay_for_attempt(self.attempts_made))
        } else {
            None
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id.clone(),
            queue: self.queue,
            job_type: self.job_type().to_string(),
        }
    }
}

/// Caller-facing reference to an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: String,
}
