//! Object storage boundary.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// An uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Caller-chosen id, recorded on the video row
    pub public_id: String,
    /// Bucket key the id maps to
    pub key: String,
    /// Retrieval URL valid at upload time
    pub url: String,
}

/// Upload media by id and hand out retrieval URLs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload_video(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject>;

    async fn upload_image(&self, path: &Path, public_id: &str) -> StorageResult<StoredObject>;

    /// Retrieval URL for a previously uploaded video.
    async fn video_url(&self, public_id: &str) -> StorageResult<String>;
}

/// Bucket key for a video id.
pub fn video_key(public_id: &str) -> StorageResult<String> {
    validate_public_id(public_id)?;
    Ok(format!("videos/{}.mp4", public_id))
}

/// Bucket key for an image id.
pub fn image_key(public_id: &str) -> StorageResult<String> {
    validate_public_id(public_id)?;
    Ok(format!("images/{}.jpg", public_id))
}

fn validate_public_id(public_id: &str) -> StorageResult<()> {
    if public_id.is_empty() {
        return Err(StorageError::invalid_key("empty id"));
    }
    if public_id.contains('/') || public_id.contains("..") {
        return Err(StorageError::invalid_key(public_id));
    }
    Ok(())
}
