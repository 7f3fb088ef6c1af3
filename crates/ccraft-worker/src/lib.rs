//! Caption pipeline worker.
//!
//! This crate provides:
//! - Stage processors for transcription, caption burn-in and temp cleanup
//! - The video lifecycle state machine and retry policy
//! - Whisper speech-to-text client
//! - Job executor with graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod stages;
pub mod temp;
pub mod whisper;

pub use config::{Stage, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use lifecycle::{Resumption, RetryOutcome, StageStart, VideoLifecycle};
pub use logging::JobLogger;
pub use stages::{BurnInProcessor, CleanupProcessor, SweepReport, TranscriptionProcessor};
pub use temp::TempFiles;
pub use whisper::{SpeechToText, WhisperClient, WhisperConfig};
