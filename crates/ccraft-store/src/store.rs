//! Record store boundary.

use async_trait::async_trait;

use ccraft_models::{TranscriptDocument, TranscriptRecord, VideoId, VideoRecord, VideoUpdate};

use crate::error::StoreResult;

/// Reads and writes the video and transcript rows the pipeline touches.
///
/// Every video lookup filters on id, and on owner when one is given. Workers
/// only know the video id; request-side callers pass the owner.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_video(&self, id: &VideoId, owner: Option<&str>) -> StoreResult<VideoRecord>;

    /// Apply a partial update and return the updated row.
    async fn update_video(&self, id: &VideoId, update: &VideoUpdate) -> StoreResult<VideoRecord>;

    async fn get_transcript(&self, video_id: &VideoId) -> StoreResult<Option<TranscriptRecord>>;

    /// Insert or replace the speech-to-text output, keeping any edited copy.
    async fn save_original_transcript(
        &self,
        video_id: &VideoId,
        document: &TranscriptDocument,
    ) -> StoreResult<()>;
}
