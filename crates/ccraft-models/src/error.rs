//! Model error types.

use thiserror::Error;

use crate::video::VideoStatus;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: VideoStatus, to: VideoStatus },

    #[error("Unknown video status: {0}")]
    UnknownStatus(String),

    #[error("Unknown transcript kind: {0}")]
    UnknownTranscriptKind(String),
}
