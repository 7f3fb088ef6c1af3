//! Shared fakes and harness for worker integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ccraft_media::{MediaError, MediaResult, MediaToolkit};
use ccraft_models::{
    CaptionStyle, TranscriptDocument, TranscriptSegment, VideoId, VideoRecord, VideoStatus,
};
use ccraft_queue::{
    CacheConfig, ConnectionPool, JobCache, JobEnvelope, MemoryBroker, MemoryConnector, QueueJob,
    QueueRegistry, RegistryConfig,
};
use ccraft_storage::{video_key, image_key, ObjectStorage, StorageError, StorageResult, StoredObject};
use ccraft_store::MemoryStore;
use ccraft_worker::{SpeechToText, VideoLifecycle, WorkerError, WorkerResult};

pub const MEDIA_HOST: &str = "https://media.test";

/// Object storage that remembers what was uploaded.
#[derive(Default)]
pub struct FakeStorage {
    pub videos: Mutex<Vec<String>>,
    pub images: Mutex<Vec<String>>,
    pub fail_images: AtomicBool,
    pub fail_videos: AtomicBool,
}

impl FakeStorage {
    pub fn uploaded_videos(&self) -> Vec<String> {
        self.videos.lock().unwrap().clone()
    }

    pub fn uploaded_images(&self) -> Vec<String> {
        self.images.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload_video(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject> {
        if self.fail_videos.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("bucket unavailable"));
        }
        if !path.exists() {
            return Err(StorageError::not_found(path.display().to_string()));
        }
        let key = video_key(public_id)?;
        self.videos.lock().unwrap().push(public_id.to_string());
        Ok(StoredObject {
            public_id: public_id.to_string(),
            url: format!("{}/{}", MEDIA_HOST, key),
            key,
        })
    }

    async fn upload_image(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject> {
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("bucket unavailable"));
        }
        if !path.exists() {
            return Err(StorageError::not_found(path.display().to_string()));
        }
        let key = image_key(public_id)?;
        self.images.lock().unwrap().push(public_id.to_string());
        Ok(StoredObject {
            public_id: public_id.to_string(),
            url: format!("{}/{}", MEDIA_HOST, key),
            key,
        })
    }

    async fn video_url(&self, public_id: &str) -> StorageResult<String> {
        Ok(format!("{}/{}", MEDIA_HOST, video_key(public_id)?))
    }
}

/// A recorded burn-in call.
#[derive(Debug, Clone)]
pub struct BurnCall {
    pub source: String,
    pub subtitles: String,
    pub style: Option<CaptionStyle>,
}

/// Media toolkit that writes placeholder outputs instead of running FFmpeg.
#[derive(Default)]
pub struct FakeMedia {
    pub burns: Mutex<Vec<BurnCall>>,
    pub downloads: Mutex<Vec<String>>,
    pub extractions: AtomicUsize,
    pub fail_extract: AtomicBool,
    pub fail_thumbnail: AtomicBool,
    pub fail_burn: AtomicBool,
}

impl FakeMedia {
    pub fn burn_calls(&self) -> Vec<BurnCall> {
        self.burns.lock().unwrap().clone()
    }

    pub fn download_urls(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn extract_audio(&self, input: &Path, output: &Path) -> MediaResult<()> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        if self.fail_extract.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("FFmpeg exited with 1", None, Some(1)));
        }
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }
        tokio::fs::write(output, b"mp3").await?;
        Ok(())
    }

    async fn burn_subtitles(
        &self,
        source: &str,
        subtitles: &Path,
        style: Option<&CaptionStyle>,
        output: &Path,
    ) -> MediaResult<()> {
        let srt = tokio::fs::read_to_string(subtitles).await?;
        self.burns.lock().unwrap().push(BurnCall {
            source: source.to_string(),
            subtitles: srt,
            style: style.cloned(),
        });
        if self.fail_burn.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("FFmpeg exited with 1", None, Some(1)));
        }
        tokio::fs::write(output, b"burned").await?;
        Ok(())
    }

    async fn download(&self, url: &str, output: &Path) -> MediaResult<()> {
        self.downloads.lock().unwrap().push(url.to_string());
        tokio::fs::write(output, b"video").await?;
        Ok(())
    }

    async fn thumbnail(&self, _input: &Path, output: &Path) -> MediaResult<()> {
        if self.fail_thumbnail.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("no video stream", None, Some(1)));
        }
        tokio::fs::write(output, b"jpg").await?;
        Ok(())
    }
}

/// Speech-to-text returning a canned document.
pub struct FakeSpeech {
    document: TranscriptDocument,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeSpeech {
    pub fn new(document: TranscriptDocument) -> Self {
        Self {
            document,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn transcribe(&self, audio: &Path) -> WorkerResult<TranscriptDocument> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(WorkerError::speech_to_text("503 Service Unavailable: overloaded"));
        }
        assert!(audio.exists(), "audio should be extracted before transcription");
        Ok(self.document.clone())
    }
}

pub fn segment(id: u32, start: f64, end: f64, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        id,
        start,
        end,
        text: text.to_string(),
    }
}

pub fn sample_document() -> TranscriptDocument {
    TranscriptDocument {
        text: "Hello there. General Kenobi.".to_string(),
        language: Some("english".to_string()),
        duration: Some(3.2),
        segments: Some(vec![
            segment(0, 0.0, 1.5, "Hello there."),
            segment(1, 1.5, 3.2, "General Kenobi."),
        ]),
        words: Vec::new(),
    }
}

/// Everything a stage needs, wired against in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub storage: Arc<FakeStorage>,
    pub media: Arc<FakeMedia>,
    pub speech: Arc<FakeSpeech>,
    pub broker: Arc<MemoryBroker>,
    pub connector: Arc<MemoryConnector>,
    pub registry: Arc<QueueRegistry>,
    pub cache: JobCache,
    pub lifecycle: Arc<VideoLifecycle>,
    pub temp: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let connector = Arc::new(MemoryConnector::new(broker.clone()));
        let pool = Arc::new(ConnectionPool::new(connector.clone()));
        let registry = Arc::new(QueueRegistry::new(pool, RegistryConfig::default()));
        let cache = JobCache::new(
            registry.clone(),
            CacheConfig {
                batch_window: Duration::from_millis(5),
                ..CacheConfig::default()
            },
        );
        let lifecycle = Arc::new(VideoLifecycle::new(store.clone(), Arc::new(cache.clone())));

        Self {
            store,
            storage: Arc::new(FakeStorage::default()),
            media: Arc::new(FakeMedia::default()),
            speech: Arc::new(FakeSpeech::new(sample_document())),
            broker,
            connector,
            registry,
            cache,
            lifecycle,
            temp: tempfile::tempdir().unwrap(),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.temp.path().join("work")
    }

    /// Insert a video with the given status and original media id.
    pub async fn video(&self, id: &str, status: VideoStatus, original: Option<&str>) -> VideoId {
        let video_id = VideoId::from(id);
        let mut record = VideoRecord::new(video_id.clone(), "alice", "clip");
        record.status = status;
        record.original_media_id = original.map(str::to_string);
        if status == VideoStatus::Failed {
            record.error_message = Some("earlier failure".to_string());
        }
        self.store.insert_video(record).await;
        video_id
    }

    /// Write a fake upload into the harness's upload area.
    pub async fn upload_file(&self, name: &str) -> PathBuf {
        let dir = self.temp.path().join("uploads");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(name);
        tokio::fs::write(&path, b"original video").await.unwrap();
        path
    }
}

pub fn envelope(job: QueueJob) -> JobEnvelope {
    let options = job.queue().default_options();
    JobEnvelope::new(job, options)
}

/// Files left in a directory.
pub async fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Some(entry) = entries.next_entry().await.unwrap() {
        found.push(entry.path());
    }
    found
}
