//! Worker error types.

use thiserror::Error;

use ccraft_media::MediaError;
use ccraft_queue::JobFailure;
use ccraft_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// Missing or malformed upstream data. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Model(#[from] ccraft_models::ModelError),

    #[error("Speech-to-text failed: {0}")]
    SpeechToText(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Record store error: {0}")]
    Store(#[from] ccraft_store::StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] ccraft_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn speech_to_text(msg: impl Into<String>) -> Self {
        Self::SpeechToText(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Collaborator, store, storage, media and I/O failures are; bad input and
    /// illegal status transitions are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Validation(_) | WorkerError::Model(_) | WorkerError::ConfigError(_) => false,
            WorkerError::Media(MediaError::InvalidSubtitles(_)) => false,
            WorkerError::Storage(StorageError::InvalidKey(_)) => false,
            _ => true,
        }
    }

    /// Outcome reported to the queue consumer.
    pub fn to_failure(&self) -> JobFailure {
        if self.is_retryable() {
            JobFailure::retryable(self.to_string())
        } else {
            JobFailure::permanent(self.to_string())
        }
    }
}
