//! Caption style documents.
//!
//! The pipeline never interprets a caption style; it is read from the video
//! record and handed to the media toolkit unchanged.

use serde::{Deserialize, Serialize};

/// Opaque caption style document (JSON object chosen by the user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct CaptionStyle(pub serde_json::Value);

impl CaptionStyle {
    /// Wrap a raw JSON document.
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Borrow the raw document.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// True when no style has been chosen.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}
