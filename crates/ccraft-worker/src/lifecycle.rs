//! Video lifecycle state machine and retry policy.
//!
//! Statuses only move forward along
//! `uploading -> processing -> ready -> burning_in -> complete`, except that
//! any status may become `failed` and `failed` may go back to `uploading`.
//! Producer paths (upload, burn-in request, retry) decide what to enqueue;
//! stage workers call back here to persist every transition.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use ccraft_models::{VideoId, VideoRecord, VideoStatus, VideoUpdate};
use ccraft_queue::{BurnInJob, JobHandle, JobSubmitter, QueueJob, TranscribeJob};
use ccraft_store::RecordStore;

use crate::config::Stage;
use crate::error::{WorkerError, WorkerResult};

/// Stage a retry resumed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumption {
    Transcription,
    BurnIn,
}

/// Result of a successful retry request.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub video: VideoRecord,
    pub resumed: Resumption,
    pub handle: JobHandle,
}

/// How a stage worker should treat a reserved job.
#[derive(Debug, Clone)]
pub enum StageStart {
    /// Run the stage against this record.
    Run(VideoRecord),
    /// The record is already past this stage; the job is a stale duplicate.
    AlreadyDone(VideoRecord),
}

pub struct VideoLifecycle {
    store: Arc<dyn RecordStore>,
    submitter: Arc<dyn JobSubmitter>,
}

impl VideoLifecycle {
    pub fn new(store: Arc<dyn RecordStore>, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self { store, submitter }
    }

    /// Upload accepted: the record is `uploading`; queue its transcription.
    pub async fn upload_accepted(
        &self,
        id: &VideoId,
        owner: &str,
        file_path: Option<PathBuf>,
    ) -> WorkerResult<JobHandle> {
        let video = self.store.get_video(id, Some(owner)).await?;
        if video.status != VideoStatus::Uploading {
            return Err(WorkerError::validation(format!(
                "video {} is {}, expected uploading",
                id, video.status
            )));
        }

        let job = QueueJob::Transcribe(TranscribeJob::new(id.clone(), file_path));
        self.submit_or_fail(id, job, false).await
    }

    /// Queue caption burn-in for a video whose transcript is ready.
    pub async fn request_burn_in(&self, id: &VideoId, owner: &str) -> WorkerResult<JobHandle> {
        let video = self.store.get_video(id, Some(owner)).await?;
        if video.status != VideoStatus::Ready {
            return Err(WorkerError::validation(format!(
                "video {} is {}, captions can only be burned in once it is ready",
                id, video.status
            )));
        }

        self.submit_or_fail(id, QueueJob::BurnIn(BurnInJob::new(id.clone())), false)
            .await
    }

    /// Retry a failed video.
    ///
    /// Resets to `uploading` and clears the error message. The resumption point
    /// is inferred only from whether the original media was already uploaded:
    /// if it was, transcription is assumed to have succeeded and only burn-in
    /// is queued. The stage that actually failed is not recorded, so a
    /// transcription that failed after its upload resumes at burn-in.
    ///
    /// The job bypasses submission dedup: an identical earlier job has
    /// already run and failed, so sharing its handle would queue nothing.
    pub async fn retry(&self, id: &VideoId, owner: &str) -> WorkerResult<RetryOutcome> {
        let video = self.store.get_video(id, Some(owner)).await?;
        if video.status != VideoStatus::Failed {
            return Err(WorkerError::validation(format!(
                "video {} is {}, only failed videos can be retried",
                id, video.status
            )));
        }

        let resumed = if video.has_original_media() {
            Resumption::BurnIn
        } else {
            Resumption::Transcription
        };

        let video = self.advance(&video, VideoUpdate::retry()).await?;

        let job = match resumed {
            Resumption::BurnIn => QueueJob::BurnIn(BurnInJob::new(id.clone())),
            Resumption::Transcription => QueueJob::Transcribe(TranscribeJob::new(id.clone(), None)),
        };
        let handle = self.submit_or_fail(id, job, true).await?;

        info!(video_id = %id, resumed = ?resumed, "Video retry queued");
        Ok(RetryOutcome {
            video,
            resumed,
            handle,
        })
    }

    /// Load the record for a stage about to run.
    ///
    /// A `failed` record seen here is a broker redelivery after the stage
    /// persisted its failure; it takes the retry edge back to `uploading` so
    /// the stage's forward transitions stay legal.
    pub async fn begin(&self, id: &VideoId, stage: Stage) -> WorkerResult<StageStart> {
        let mut video = self.store.get_video(id, None).await?;

        if is_finished(stage, video.status) {
            return Ok(StageStart::AlreadyDone(video));
        }

        if video.status == VideoStatus::Failed {
            info!(video_id = %id, stage = %stage, "Redelivered job for failed video, resetting to uploading");
            video = self.advance(&video, VideoUpdate::retry()).await?;
        }

        Ok(StageStart::Run(video))
    }

    /// Persist an update after checking its status transition.
    pub async fn advance(&self, video: &VideoRecord, update: VideoUpdate) -> WorkerResult<VideoRecord> {
        if let Some(next) = update.status {
            video.status.transition_to(next)?;
        }
        Ok(self.store.update_video(&video.id, &update).await?)
    }

    /// Persist `failed` with a human-readable reason.
    pub async fn fail(&self, id: &VideoId, message: impl Into<String>) -> WorkerResult<VideoRecord> {
        Ok(self.store.update_video(id, &VideoUpdate::failed(message)).await?)
    }

    /// Submit a job; if it cannot be queued, leave the record failed so the
    /// user can retry instead of it hanging in `uploading`.
    async fn submit_or_fail(&self, id: &VideoId, job: QueueJob, fresh: bool) -> WorkerResult<JobHandle> {
        let submitted = if fresh {
            self.submitter.submit_fresh(job).await
        } else {
            self.submitter.submit(job).await
        };
        match submitted {
            Ok(handle) => Ok(handle),
            Err(e) => {
                warn!(video_id = %id, "Failed to queue job: {}", e);
                if let Err(persist) = self.fail(id, format!("Could not queue job: {}", e)).await {
                    warn!(video_id = %id, "Failed to persist queueing failure: {}", persist);
                }
                Err(e.into())
            }
        }
    }
}

fn is_finished(stage: Stage, status: VideoStatus) -> bool {
    match stage {
        Stage::Transcription => matches!(
            status,
            VideoStatus::Ready | VideoStatus::BurningIn | VideoStatus::Complete
        ),
        Stage::BurnIn => status == VideoStatus::Complete,
        Stage::Cleanup => false,
    }
}
