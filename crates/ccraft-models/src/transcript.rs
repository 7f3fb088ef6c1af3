//! Transcript documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::video::{TranscriptKind, VideoId};

/// Timed word inside a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Timed segment (one caption cue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    #[serde(default)]
    pub id: u32,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    pub text: String,
}

/// Structured transcript as produced by speech-to-text and edited by users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranscriptDocument {
    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Duration of the audio in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// `None` when the document carries no usable segment list.
    #[serde(default, deserialize_with = "segments_or_none")]
    pub segments: Option<Vec<TranscriptSegment>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<TranscriptWord>,
}

impl TranscriptDocument {
    /// Segments, if present and non-empty.
    pub fn usable_segments(&self) -> Option<&[TranscriptSegment]> {
        self.segments
            .as_deref()
            .filter(|segments| !segments.is_empty())
    }
}

// Edited transcripts come from user input; a malformed segment list is
// treated as absent so the burn-in stage can report it as a validation error.
fn segments_or_none<'de, D>(deserializer: D) -> Result<Option<Vec<TranscriptSegment>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(v @ serde_json::Value::Array(_)) => serde_json::from_value(v).ok(),
        _ => None,
    })
}

/// Transcript row belonging to exactly one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub video_id: VideoId,

    /// Speech-to-text output
    #[serde(default, rename = "transcript_data")]
    pub original: Option<TranscriptDocument>,

    /// User-edited copy
    #[serde(default, rename = "edited_transcript_data")]
    pub edited: Option<TranscriptDocument>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TranscriptRecord {
    pub fn new(video_id: VideoId, original: TranscriptDocument) -> Self {
        Self {
            video_id,
            original: Some(original),
            edited: None,
            updated_at: Some(Utc::now()),
        }
    }

    /// Document selected by the video's active transcript kind.
    pub fn active(&self, kind: TranscriptKind) -> Option<&TranscriptDocument> {
        match kind {
            TranscriptKind::Original => self.original.as_ref(),
            TranscriptKind::Edited => self.edited.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_verbose_speech_output() {
        let doc: TranscriptDocument = serde_json::from_value(serde_json::json!({
            "task": "transcribe",
            "language": "english",
            "duration": 3.5,
            "text": "hello world",
            "segments": [
                {"id": 0, "seek": 0, "start": 0.0, "end": 1.5, "text": " hello", "tokens": [1, 2]},
                {"id": 1, "seek": 0, "start": 1.5, "end": 3.5, "text": " world"}
            ],
            "words": [{"word": "hello", "start": 0.0, "end": 1.0}]
        }))
        .unwrap();

        assert_eq!(doc.usable_segments().map(|s| s.len()), Some(2));
        assert_eq!(doc.words.len(), 1);
        assert_eq!(doc.language.as_deref(), Some("english"));
    }

    #[test]
    fn test_non_array_segments_are_absent() {
        let doc: TranscriptDocument =
            serde_json::from_value(serde_json::json!({"text": "x", "segments": "nope"})).unwrap();
        assert!(doc.segments.is_none());
        assert!(doc.usable_segments().is_none());
    }

    #[test]
    fn test_empty_segments_are_not_usable() {
        let doc: TranscriptDocument =
            serde_json::from_value(serde_json::json!({"segments": []})).unwrap();
        assert!(doc.usable_segments().is_none());
    }

    #[test]
    fn test_active_document_follows_kind() {
        let original = TranscriptDocument {
            text: "original".into(),
            ..Default::default()
        };
        let record = TranscriptRecord::new(VideoId::from("v1"), original);

        assert_eq!(record.active(TranscriptKind::Original).unwrap().text, "original");
        assert!(record.active(TranscriptKind::Edited).is_none());
    }
}
