//! In-memory record store for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use ccraft_models::{
    TranscriptDocument, TranscriptRecord, VideoId, VideoRecord, VideoStatus, VideoUpdate,
};

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;

#[derive(Default)]
struct State {
    videos: HashMap<VideoId, VideoRecord>,
    transcripts: HashMap<VideoId, TranscriptRecord>,
    history: HashMap<VideoId, Vec<VideoStatus>>,
}

/// [`RecordStore`] backed by hash maps.
///
/// Keeps a per-video history of every status written so tests can assert
/// the exact lifecycle a job drove the record through.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_video(&self, record: VideoRecord) {
        let mut state = self.state.lock().await;
        state
            .history
            .entry(record.id.clone())
            .or_default()
            .push(record.status);
        state.videos.insert(record.id.clone(), record);
    }

    pub async fn insert_transcript(&self, record: TranscriptRecord) {
        let mut state = self.state.lock().await;
        state.transcripts.insert(record.video_id.clone(), record);
    }

    pub async fn video(&self, id: &VideoId) -> Option<VideoRecord> {
        self.state.lock().await.videos.get(id).cloned()
    }

    pub async fn transcript(&self, id: &VideoId) -> Option<TranscriptRecord> {
        self.state.lock().await.transcripts.get(id).cloned()
    }

    /// Every status the video has held, oldest first.
    pub async fn status_history(&self, id: &VideoId) -> Vec<VideoStatus> {
        self.state
            .lock()
            .await
            .history
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Make every call fail with a 503 until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::ServerError(503, "store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_video(&self, id: &VideoId, owner: Option<&str>) -> StoreResult<VideoRecord> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .videos
            .get(id)
            .filter(|video| owner.map_or(true, |owner| video.user_id == owner))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("videos/{}", id)))
    }

    async fn update_video(&self, id: &VideoId, update: &VideoUpdate) -> StoreResult<VideoRecord> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let video = state
            .videos
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(format!("videos/{}", id)))?;
        video.apply(update);
        let updated = video.clone();

        if let Some(status) = update.status {
            state.history.entry(id.clone()).or_default().push(status);
        }
        Ok(updated)
    }

    async fn get_transcript(&self, video_id: &VideoId) -> StoreResult<Option<TranscriptRecord>> {
        self.check_available()?;
        Ok(self.state.lock().await.transcripts.get(video_id).cloned())
    }

    async fn save_original_transcript(
        &self,
        video_id: &VideoId,
        document: &TranscriptDocument,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .transcripts
            .entry(video_id.clone())
            .and_modify(|record| {
                record.original = Some(document.clone());
                record.updated_at = Some(Utc::now());
            })
            .or_insert_with(|| TranscriptRecord::new(video_id.clone(), document.clone()));
        Ok(())
    }
}
