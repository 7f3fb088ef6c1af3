//! Media transformation toolkit.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use ccraft_models::CaptionStyle;

use crate::command::{escape_filter_value, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::style::force_style;

/// Seek offset for thumbnail frames.
const THUMBNAIL_OFFSET_SECS: f64 = 1.0;
const THUMBNAIL_SCALE_WIDTH: u32 = 480;

/// Media operations the stage workers need.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Extract the audio track as MP3.
    async fn extract_audio(&self, input: &Path, output: &Path) -> MediaResult<()>;

    /// Burn an SRT file into a video. `source` is a local path or a URL.
    async fn burn_subtitles(
        &self,
        source: &str,
        subtitles: &Path,
        style: Option<&CaptionStyle>,
        output: &Path,
    ) -> MediaResult<()>;

    /// Fetch a remote video into a local file.
    async fn download(&self, url: &str, output: &Path) -> MediaResult<()>;

    /// Grab a single scaled frame as JPEG.
    async fn thumbnail(&self, input: &Path, output: &Path) -> MediaResult<()>;
}

/// [`MediaToolkit`] backed by the FFmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
}

impl FfmpegToolkit {
    /// Toolkit using the `ffmpeg` found in PATH.
    pub fn new() -> MediaResult<Self> {
        Ok(Self::with_runner(FfmpegRunner::new()?))
    }

    pub fn with_runner(runner: FfmpegRunner) -> Self {
        Self { runner }
    }
}

/// `subtitles=` filter for an SRT file with an optional style override.
pub fn subtitles_filter(subtitles: &Path, style: Option<&CaptionStyle>) -> String {
    let mut filter = format!(
        "subtitles='{}'",
        escape_filter_value(&subtitles.to_string_lossy())
    );
    if let Some(forced) = style.and_then(force_style) {
        filter.push_str(&format!(":force_style='{}'", escape_filter_value(&forced)));
    }
    filter
}

async fn require_file(path: &Path) -> MediaResult<()> {
    if tokio::fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn extract_audio(&self, input: &Path, output: &Path) -> MediaResult<()> {
        require_file(input).await?;

        let cmd = FfmpegCommand::new(input, output)
            .no_video()
            .audio_codec("libmp3lame");
        self.runner.run(&cmd).await?;

        info!("Extracted audio {} -> {}", input.display(), output.display());
        Ok(())
    }

    async fn burn_subtitles(
        &self,
        source: &str,
        subtitles: &Path,
        style: Option<&CaptionStyle>,
        output: &Path,
    ) -> MediaResult<()> {
        require_file(subtitles).await?;

        let cmd = FfmpegCommand::from_source(source, output)
            .video_filter(subtitles_filter(subtitles, style))
            .output_args(["-c:a", "copy"]);
        self.runner.run(&cmd).await?;

        info!("Burned captions into {}", output.display());
        Ok(())
    }

    async fn download(&self, url: &str, output: &Path) -> MediaResult<()> {
        let cmd = FfmpegCommand::from_source(url, output).stream_copy();
        self.runner
            .run(&cmd)
            .await
            .map_err(|e| MediaError::download_failed(format!("{}: {}", url, e)))?;

        info!("Downloaded {} -> {}", url, output.display());
        Ok(())
    }

    async fn thumbnail(&self, input: &Path, output: &Path) -> MediaResult<()> {
        require_file(input).await?;

        let cmd = FfmpegCommand::new(input, output)
            .seek(THUMBNAIL_OFFSET_SECS)
            .single_frame()
            .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH));
        self.runner.run(&cmd).await
    }
}
