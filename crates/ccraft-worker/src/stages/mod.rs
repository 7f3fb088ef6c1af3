//! Stage processors, one per queue.

pub mod burn_in;
pub mod cleanup;
pub mod transcription;

pub use burn_in::BurnInProcessor;
pub use cleanup::{sweep_dir, sweep_dir_with, CleanupProcessor, SweepReport};
pub use transcription::TranscriptionProcessor;

use ccraft_models::VideoId;
use ccraft_queue::JobFailure;

use crate::error::{WorkerError, WorkerResult};
use crate::lifecycle::VideoLifecycle;
use crate::logging::JobLogger;

/// Report a video stage's outcome. Failures are persisted on the record
/// before being handed back to the consumer for retry handling.
async fn finish(
    lifecycle: &VideoLifecycle,
    video_id: &VideoId,
    logger: &JobLogger,
    result: WorkerResult<()>,
) -> Result<(), JobFailure> {
    match result {
        Ok(()) => {
            logger.log_completion("stage finished");
            Ok(())
        }
        Err(e) => {
            logger.log_error(&e.to_string());
            if let Err(persist) = lifecycle.fail(video_id, e.to_string()).await {
                logger.log_warning(&format!("failed to persist failure: {}", persist));
            }
            Err(e.to_failure())
        }
    }
}

fn unexpected_job(expected: &str, actual: &str) -> JobFailure {
    WorkerError::validation(format!("expected a {} job, got {}", expected, actual)).to_failure()
}
