//! Video records and the lifecycle status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::style::CaptionStyle;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video lifecycle status.
///
/// Statuses move forward along
/// `uploading -> processing -> ready -> burning_in -> complete`.
/// Any status may move to `failed`, and `failed` may only move back to
/// `uploading` (a retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Upload accepted, transcription queued
    #[default]
    Uploading,
    /// Original media stored, transcription running
    Processing,
    /// Transcript usable
    Ready,
    /// Captions being burned into the video
    BurningIn,
    /// Final media produced
    Complete,
    /// A stage failed; see the record's error message
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploading => "uploading",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::BurningIn => "burning_in",
            VideoStatus::Complete => "complete",
            VideoStatus::Failed => "failed",
        }
    }

    /// Position along the forward pipeline. `Failed` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            VideoStatus::Uploading => Some(0),
            VideoStatus::Processing => Some(1),
            VideoStatus::Ready => Some(2),
            VideoStatus::BurningIn => Some(3),
            VideoStatus::Complete => Some(4),
            VideoStatus::Failed => None,
        }
    }

    /// `complete` is the only terminal status; `failed` can be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Complete)
    }

    /// Check whether moving to `next` respects the lifecycle rules.
    ///
    /// Re-persisting the current status is allowed so that redelivered jobs
    /// stay idempotent.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        if *self == next || next == VideoStatus::Failed {
            return true;
        }

        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (None, _) => next == VideoStatus::Uploading,
            (Some(_), None) => false,
        }
    }

    /// Validate a transition, returning the new status.
    pub fn transition_to(&self, next: VideoStatus) -> ModelResult<VideoStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(VideoStatus::Uploading),
            "processing" => Ok(VideoStatus::Processing),
            "ready" => Ok(VideoStatus::Ready),
            "burning_in" => Ok(VideoStatus::BurningIn),
            "complete" => Ok(VideoStatus::Complete),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Which transcript the burn-in stage renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    #[default]
    Original,
    Edited,
}

impl TranscriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptKind::Original => "original",
            TranscriptKind::Edited => "edited",
        }
    }
}

impl fmt::Display for TranscriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TranscriptKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(TranscriptKind::Original),
            "edited" => Ok(TranscriptKind::Edited),
            other => Err(ModelError::UnknownTranscriptKind(other.to_string())),
        }
    }
}

/// Video row as stored in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Unique video ID
    pub id: VideoId,

    /// Owner
    pub user_id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Lifecycle status
    #[serde(default)]
    pub status: VideoStatus,

    /// Object-storage id of the uploaded original (upstream artifact)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_media_id: Option<String>,

    /// Object-storage id of the captioned output (downstream artifact)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_media_id: Option<String>,

    /// Thumbnail URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// Human-readable failure reason (set only while failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Transcript selected for burn-in
    #[serde(default, rename = "active_transcript_type")]
    pub active_transcript_kind: TranscriptKind,

    /// Opaque caption style document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption_style: Option<CaptionStyle>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Create a freshly uploaded video record.
    pub fn new(id: VideoId, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            title: title.into(),
            status: VideoStatus::Uploading,
            original_media_id: None,
            final_media_id: None,
            thumbnail_url: None,
            error_message: None,
            active_transcript_kind: TranscriptKind::Original,
            caption_style: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the original upload has been stored.
    pub fn has_original_media(&self) -> bool {
        self.original_media_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &VideoUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(id) = &update.original_media_id {
            self.original_media_id = Some(id.clone());
        }
        if let Some(id) = &update.final_media_id {
            self.final_media_id = Some(id.clone());
        }
        if let Some(url) = &update.thumbnail_url {
            self.thumbnail_url = Some(url.clone());
        }
        if let Some(message) = &update.error_message {
            self.error_message = message.clone();
        }
        if let Some(kind) = update.active_transcript_kind {
            self.active_transcript_kind = kind;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a video row. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<VideoStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_media_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_media_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    /// `Some(None)` clears the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<Option<String>>,

    #[serde(rename = "active_transcript_type", skip_serializing_if = "Option::is_none")]
    pub active_transcript_kind: Option<TranscriptKind>,
}

impl VideoUpdate {
    /// Update that only changes the status.
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Mark failed with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(VideoStatus::Failed),
            error_message: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Reset to `uploading` and clear the error message.
    pub fn retry() -> Self {
        Self {
            status: Some(VideoStatus::Uploading),
            error_message: Some(None),
            ..Default::default()
        }
    }

    pub fn with_original_media(mut self, id: impl Into<String>) -> Self {
        self.original_media_id = Some(id.into());
        self
    }

    pub fn with_final_media(mut self, id: impl Into<String>) -> Self {
        self.final_media_id = Some(id.into());
        self
    }

    pub fn with_thumbnail(mut self, url: Option<String>) -> Self {
        self.thumbnail_url = url;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use VideoStatus::*;
        assert!(Uploading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(BurningIn));
        assert!(BurningIn.can_transition_to(Complete));
        // Skipping ahead is still forward.
        assert!(Uploading.can_transition_to(BurningIn));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use VideoStatus::*;
        assert!(!Ready.can_transition_to(Processing));
        assert!(!Complete.can_transition_to(BurningIn));
        assert!(!Processing.can_transition_to(Uploading));
    }

    #[test]
    fn test_failed_only_returns_to_uploading() {
        use VideoStatus::*;
        assert!(Failed.can_transition_to(Uploading));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Failed.can_transition_to(Complete));
    }

    #[test]
    fn test_any_status_can_fail() {
        use VideoStatus::*;
        for status in [Uploading, Processing, Ready, BurningIn, Complete, Failed] {
            assert!(status.can_transition_to(Failed), "{status} -> failed");
        }
    }

    #[test]
    fn test_transition_error_names_both_ends() {
        let err = VideoStatus::Complete
            .transition_to(VideoStatus::Ready)
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid status transition: complete -> ready");
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in ["uploading", "processing", "ready", "burning_in", "complete", "failed"] {
            let status: VideoStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("archived".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_update_clears_error_message() {
        let mut video = VideoRecord::new(VideoId::from("v1"), "user-1", "clip");
        video.apply(&VideoUpdate::failed("boom"));
        assert_eq!(video.status, VideoStatus::Failed);
        assert_eq!(video.error_message.as_deref(), Some("boom"));

        video.apply(&VideoUpdate::retry());
        assert_eq!(video.status, VideoStatus::Uploading);
        assert!(video.error_message.is_none());
    }

    #[test]
    fn test_update_serializes_cleared_message_as_null() {
        let json = serde_json::to_value(VideoUpdate::retry()).unwrap();
        assert_eq!(json["status"], "uploading");
        assert!(json["error_message"].is_null());
        assert!(json.get("final_media_id").is_none());
    }

    #[test]
    fn test_record_deserializes_store_row() {
        let row = serde_json::json!({
            "id": "v1",
            "user_id": "u1",
            "title": "demo",
            "status": "burning_in",
            "original_media_id": "v1",
            "active_transcript_type": "edited",
            "caption_style": {"fontSize": 32},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let video: VideoRecord = serde_json::from_value(row).unwrap();
        assert_eq!(video.status, VideoStatus::BurningIn);
        assert_eq!(video.active_transcript_kind, TranscriptKind::Edited);
        assert!(video.has_original_media());
        assert!(video.caption_style.is_some());
    }
}
