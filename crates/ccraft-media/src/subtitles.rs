//! SRT subtitle generation from transcript segments.

use std::fmt::Write as _;
use std::path::Path;

use ccraft_models::{TranscriptDocument, TranscriptSegment};

use crate::error::{MediaError, MediaResult};

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render numbered SRT cues, one per segment.
pub fn render_srt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        // Writing into a String cannot fail.
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        );
    }
    out
}

/// Write the document's segments as an SRT file.
///
/// Fails when the document has no usable segment list.
pub async fn write_srt(document: &TranscriptDocument, path: &Path) -> MediaResult<()> {
    let segments = document
        .usable_segments()
        .ok_or_else(|| MediaError::invalid_subtitles("transcript has no segments"))?;

    tokio::fs::write(path, render_srt(segments)).await?;
    Ok(())
}
