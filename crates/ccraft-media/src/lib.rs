//! FFmpeg CLI wrapper for the captioning pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner that reports stderr
//! - [`MediaToolkit`] (audio extraction, caption burn-in, download, thumbnails)
//! - SRT generation from transcript segments
//! - Caption style translation to ASS `force_style`

pub mod command;
pub mod error;
pub mod style;
pub mod subtitles;
pub mod toolkit;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use style::force_style;
pub use subtitles::{format_timestamp, render_srt, write_srt};
pub use toolkit::{subtitles_filter, FfmpegToolkit, MediaToolkit};
