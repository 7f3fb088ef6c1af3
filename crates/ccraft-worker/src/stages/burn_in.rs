//! Caption burn-in stage.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use ccraft_media::{write_srt, MediaToolkit};
use ccraft_models::{VideoStatus, VideoUpdate};
use ccraft_queue::{BurnInJob, JobEnvelope, JobFailure, JobProcessor, QueueJob, QueueName};
use ccraft_storage::ObjectStorage;
use ccraft_store::RecordStore;

use crate::config::Stage;
use crate::error::{WorkerError, WorkerResult};
use crate::lifecycle::{StageStart, VideoLifecycle};
use crate::logging::JobLogger;
use crate::stages::{finish, unexpected_job};
use crate::temp::TempFiles;

pub struct BurnInProcessor {
    lifecycle: Arc<VideoLifecycle>,
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaToolkit>,
    temp_dir: PathBuf,
}

impl BurnInProcessor {
    pub fn new(
        lifecycle: Arc<VideoLifecycle>,
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaToolkit>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            storage,
            media,
            temp_dir: temp_dir.into(),
        }
    }

    async fn run(&self, job: &BurnInJob, temp: &mut TempFiles, logger: &JobLogger) -> WorkerResult<()> {
        let id = &job.video_id;
        let video = match self.lifecycle.begin(id, Stage::BurnIn).await? {
            StageStart::Run(video) => video,
            StageStart::AlreadyDone(_) => {
                logger.log_warning("captions already burned in, skipping");
                return Ok(());
            }
        };

        let original = video
            .original_media_id
            .clone()
            .filter(|media_id| !media_id.is_empty())
            .ok_or_else(|| WorkerError::validation(format!("video {} has no uploaded original", id)))?;
        let transcript = self
            .store
            .get_transcript(id)
            .await?
            .ok_or_else(|| WorkerError::validation(format!("video {} has no transcript", id)))?;

        let video = self
            .lifecycle
            .advance(&video, VideoUpdate::status(VideoStatus::BurningIn))
            .await?;

        let kind = video.active_transcript_kind;
        let document = transcript
            .active(kind)
            .filter(|doc| doc.usable_segments().is_some())
            .ok_or_else(|| {
                WorkerError::validation(format!(
                    "{} transcript segments are missing or empty",
                    kind
                ))
            })?;

        let subtitles = temp.path(format!("{}.srt", id));
        write_srt(document, &subtitles).await?;

        let source = self.storage.video_url(&original).await?;
        let output = temp.path(format!("{}_burned.mp4", id));
        self.media
            .burn_subtitles(&source, &subtitles, video.caption_style.as_ref(), &output)
            .await?;
        logger.log_progress("captions burned in");

        let stored = self
            .storage
            .upload_video(&output, &format!("{}_burned", id))
            .await?;

        self.lifecycle
            .advance(
                &video,
                VideoUpdate::status(VideoStatus::Complete).with_final_media(stored.public_id),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for BurnInProcessor {
    fn queue(&self) -> QueueName {
        QueueName::BurnIn
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<(), JobFailure> {
        let QueueJob::BurnIn(job) = &envelope.job else {
            return Err(unexpected_job("burn-in", envelope.job_type()));
        };
        let logger = JobLogger::new(envelope);

        async {
            logger.log_start(&format!("attempt {}", envelope.attempts_made + 1));
            let mut temp = TempFiles::create(&self.temp_dir)
                .await
                .map_err(|e| WorkerError::from(e).to_failure())?;

            let result = self.run(job, &mut temp, &logger).await;
            temp.remove_all().await;
            finish(&self.lifecycle, &job.video_id, &logger, result).await
        }
        .instrument(logger.create_span())
        .await
    }
}
