//! Export options to FFmpeg arguments.

use std::path::Path;

use scm_models::{OutputFormat, TranscodeJob};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Source containers accepted for export.
const INPUT_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "webm", "avi", "ts", "flv", "mpg", "mpeg"];

/// GIF frame rate; higher rates bloat the palette-less output.
const GIF_FPS: u32 = 15;

/// Fit inside `width x height`, letterboxing the rest.
pub fn scale_pad_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = width,
        h = height
    )
}

/// Subtitles filter for a file path, escaped for a filtergraph.
fn subtitles_filter(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("subtitles={}", escaped)
}

/// Reject inputs that are not a known video container.
pub fn ensure_media_input(path: &Path) -> MediaResult<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if INPUT_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(MediaError::unsupported_format(format!(
            "input '{}' is not a supported video container",
            path.display()
        )))
    }
}

/// Build the export command for a transcode job.
pub fn build_transcode_command(
    input: &Path,
    output: &Path,
    job: &TranscodeJob,
) -> MediaResult<FfmpegCommand> {
    ensure_media_input(input)?;

    let mut filters = Vec::new();
    if job.format == OutputFormat::Gif {
        filters.push(format!("fps={}", GIF_FPS));
    }
    filters.push(scale_pad_filter(job.width, job.height));
    if job.burn_subtitles {
        let subtitles = job
            .subtitle_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| MediaError::InvalidMedia("burnSubtitles set without subtitlePath".to_string()))?;
        filters.push(subtitles_filter(subtitles));
    }

    let cmd = FfmpegCommand::new(input, output).video_filter(filters.join(","));

    let cmd = match job.format {
        OutputFormat::Mp4 | OutputFormat::Mov => cmd
            .video_codec("libx264")
            .preset("veryfast")
            .crf(23)
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .audio_bitrate("128k")
            .output_args(["-movflags", "+faststart"]),
        OutputFormat::Webm => cmd
            .video_codec("libvpx-vp9")
            .crf(32)
            .output_args(["-b:v", "0", "-row-mt", "1"])
            .audio_codec("libopus")
            .audio_bitrate("96k"),
        OutputFormat::Gif => cmd.video_codec("gif").no_audio().output_args(["-loop", "0"]),
    };

    Ok(cmd)
}
