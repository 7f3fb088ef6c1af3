//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use ccraft_queue::JobEnvelope;

/// Job logger with consistent fields on every line.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    queue: String,
    video_id: Option<String>,
}

impl JobLogger {
    /// Create a logger for a reserved job.
    pub fn new(envelope: &JobEnvelope) -> Self {
        Self {
            job_id: envelope.id.to_string(),
            queue: envelope.queue.to_string(),
            video_id: envelope.job.video_id().map(|id| id.to_string()),
        }
    }

    fn video_id(&self) -> &str {
        self.video_id.as_deref().unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id(),
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id(),
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id(),
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id(),
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id(),
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Span covering the whole job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            queue = %self.queue,
            video_id = %self.video_id()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccraft_models::VideoId;
    use ccraft_queue::{CleanupJob, QueueJob, QueueName, TranscribeJob};

    #[test]
    fn test_logger_fields() {
        let job = QueueJob::Transcribe(TranscribeJob::new(VideoId::from("v1"), None));
        let envelope = JobEnvelope::new(job, QueueName::Transcription.default_options());
        let logger = JobLogger::new(&envelope);

        assert_eq!(logger.job_id(), envelope.id.to_string());
        assert_eq!(logger.video_id(), "v1");
    }

    #[test]
    fn test_cleanup_job_has_no_video() {
        let envelope = JobEnvelope::new(
            QueueJob::CleanTempFiles(CleanupJob::now()),
            QueueName::Cleanup.default_options(),
        );
        assert_eq!(JobLogger::new(&envelope).video_id(), "-");
    }
}
