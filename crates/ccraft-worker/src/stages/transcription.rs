//! Transcription stage.
//!
//! Source file -> original upload + thumbnail -> `processing` -> audio
//! extraction -> speech-to-text -> transcript row -> `ready`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use ccraft_media::MediaToolkit;
use ccraft_models::{VideoRecord, VideoStatus, VideoUpdate};
use ccraft_queue::{JobEnvelope, JobFailure, JobProcessor, QueueJob, QueueName, TranscribeJob};
use ccraft_storage::ObjectStorage;
use ccraft_store::RecordStore;

use crate::config::Stage;
use crate::error::{WorkerError, WorkerResult};
use crate::lifecycle::{StageStart, VideoLifecycle};
use crate::logging::JobLogger;
use crate::stages::{finish, unexpected_job};
use crate::temp::TempFiles;
use crate::whisper::SpeechToText;

pub struct TranscriptionProcessor {
    lifecycle: Arc<VideoLifecycle>,
    store: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaToolkit>,
    speech: Arc<dyn SpeechToText>,
    temp_dir: PathBuf,
}

impl TranscriptionProcessor {
    pub fn new(
        lifecycle: Arc<VideoLifecycle>,
        store: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaToolkit>,
        speech: Arc<dyn SpeechToText>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            storage,
            media,
            speech,
            temp_dir: temp_dir.into(),
        }
    }

    async fn run(&self, job: &TranscribeJob, temp: &mut TempFiles, logger: &JobLogger) -> WorkerResult<()> {
        let id = &job.video_id;
        let video = match self.lifecycle.begin(id, Stage::Transcription).await? {
            StageStart::Run(video) => video,
            StageStart::AlreadyDone(video) => {
                logger.log_warning(&format!("video is already {}, skipping", video.status));
                return Ok(());
            }
        };

        let (source, uploaded_source) = self.resolve_source(job, &video, temp, logger).await?;

        let video = if video.has_original_media() {
            self.lifecycle
                .advance(&video, VideoUpdate::status(VideoStatus::Processing))
                .await?
        } else {
            let stored = self.storage.upload_video(&source, id.as_str()).await?;
            logger.log_progress(&format!("uploaded original as {}", stored.public_id));
            let thumbnail = self.thumbnail(&source, &video, temp, logger).await;
            self.lifecycle
                .advance(
                    &video,
                    VideoUpdate::status(VideoStatus::Processing)
                        .with_original_media(stored.public_id)
                        .with_thumbnail(thumbnail),
                )
                .await?
        };

        let audio = temp.path(format!("{}.mp3", id));
        self.media.extract_audio(&source, &audio).await?;
        logger.log_progress("audio extracted");

        let document = self.speech.transcribe(&audio).await?;
        self.store.save_original_transcript(id, &document).await?;
        logger.log_progress("transcript saved");

        self.lifecycle
            .advance(&video, VideoUpdate::status(VideoStatus::Ready))
            .await?;

        // The upload handler's copy is only needed until the stage succeeds;
        // on failure it stays for the broker retry and the sweeper.
        if let Some(path) = uploaded_source {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                logger.log_warning(&format!("could not remove {}: {}", path.display(), e));
            }
        }
        Ok(())
    }

    /// Local source file, plus the upload handler's path when that was used.
    async fn resolve_source(
        &self,
        job: &TranscribeJob,
        video: &VideoRecord,
        temp: &mut TempFiles,
        logger: &JobLogger,
    ) -> WorkerResult<(PathBuf, Option<PathBuf>)> {
        if let Some(path) = &job.file_path {
            if tokio::fs::try_exists(path).await? {
                return Ok((path.clone(), Some(path.clone())));
            }
            logger.log_warning(&format!("{} is gone, falling back to storage", path.display()));
        }

        let media_id = video
            .original_media_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                WorkerError::validation(format!(
                    "video {} has no local upload and no stored original",
                    video.id
                ))
            })?;

        let url = self.storage.video_url(media_id).await?;
        let destination = temp.path(format!("{}_retry.mp4", video.id));
        self.media.download(&url, &destination).await?;
        logger.log_progress("downloaded stored original");
        Ok((destination, None))
    }

    /// Thumbnail URL; a thumbnail failure never fails the stage.
    async fn thumbnail(
        &self,
        source: &Path,
        video: &VideoRecord,
        temp: &mut TempFiles,
        logger: &JobLogger,
    ) -> Option<String> {
        let path = temp.path(format!("{}_thumb.jpg", video.id));
        let result = async {
            self.media.thumbnail(source, &path).await?;
            let stored = self
                .storage
                .upload_image(&path, &format!("{}_thumb", video.id))
                .await?;
            Ok::<_, WorkerError>(stored.url)
        }
        .await;

        match result {
            Ok(url) => Some(url),
            Err(e) => {
                logger.log_warning(&format!("thumbnail skipped: {}", e));
                None
            }
        }
    }
}

#[async_trait]
impl JobProcessor for TranscriptionProcessor {
    fn queue(&self) -> QueueName {
        QueueName::Transcription
    }

    async fn process(&self, envelope: &JobEnvelope) -> Result<(), JobFailure> {
        let QueueJob::Transcribe(job) = &envelope.job else {
            return Err(unexpected_job("transcribe", envelope.job_type()));
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
