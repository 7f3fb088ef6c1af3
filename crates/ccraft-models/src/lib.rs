//! Shared data models for the CaptionCraft pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Video records and the lifecycle status machine
//! - Transcript documents (segment/word timings)
//! - Job identifiers
//! - Opaque caption style documents

pub mod error;
pub mod job;
pub mod style;
pub mod transcript;
pub mod video;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use job::JobId;
pub use style::CaptionStyle;
pub use transcript::{TranscriptDocument, TranscriptRecord, TranscriptSegment, TranscriptWord};
pub use video::{TranscriptKind, VideoId, VideoRecord, VideoStatus, VideoUpdate};
