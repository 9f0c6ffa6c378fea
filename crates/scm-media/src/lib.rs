//! FFmpeg CLI wrapper for clip exports.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via tokio
//! - Duration probing with ffprobe
//! - Mapping of export options (format, size, subtitles) to encoder arguments

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{copy_atomic, partial_path};
pub use probe::probe_duration;
pub use progress::{parse_progress_line, FfmpegProgress};
pub use transcode::{build_transcode_command, ensure_media_input, scale_pad_filter};
