//! Stage payloads.
//!
//! Every payload type belongs to exactly one queue, expressed through
//! [`JobPayload::QUEUE`]. Field names are camelCase on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::job::QueueName;

/// A typed job payload bound to one queue.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Queue this payload is enqueued on.
    const QUEUE: QueueName;
    /// Job name recorded with the payload.
    const NAME: &'static str;

    /// Check producer-supplied fields before enqueueing.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Fetch an uploaded media file from the VPS into the worker's media directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpTransferJob {
    pub media_file_id: String,
    /// Path of the file on the VPS
    pub vps_path: String,
    pub filename: String,
}

impl FtpTransferJob {
    pub fn new(
        media_file_id: impl Into<String>,
        vps_path: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            media_file_id: media_file_id.into(),
            vps_path: vps_path.into(),
            filename: filename.into(),
        }
    }
}

impl JobPayload for FtpTransferJob {
    const QUEUE: QueueName = QueueName::FtpTransfer;
    const NAME: &'static str = "ftp-transfer";

    fn validate(&self) -> Result<(), String> {
        require_non_empty("mediaFileId", &self.media_file_id)?;
        require_non_empty("vpsPath", &self.vps_path)?;
        require_safe_segment("filename", &self.filename)?;
        require_safe_segment("mediaFileId", &self.media_file_id)
    }
}

/// Transcription provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionProvider {
    #[default]
    Groq,
    #[serde(rename = "assemblyai")]
    AssemblyAi,
    Deepseek,
}

impl TranscriptionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionProvider::Groq => "groq",
            TranscriptionProvider::AssemblyAi => "assemblyai",
            TranscriptionProvider::Deepseek => "deepseek",
        }
    }
}

impl fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(TranscriptionProvider::Groq),
            "assemblyai" => Ok(TranscriptionProvider::AssemblyAi),
            "deepseek" => Ok(TranscriptionProvider::Deepseek),
            other => Err(format!("unknown transcription provider: {}", other)),
        }
    }
}

/// Transcribe a local audio file with the chosen provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeJob {
    pub media_file_id: String,
    pub audio_path: String,
    #[serde(default)]
    pub provider: TranscriptionProvider,
}

impl TranscribeJob {
    pub fn new(
        media_file_id: impl Into<String>,
        audio_path: impl Into<String>,
        provider: TranscriptionProvider,
    ) -> Self {
        Self {
            media_file_id: media_file_id.into(),
            audio_path: audio_path.into(),
            provider,
        }
    }
}

impl JobPayload for TranscribeJob {
    const QUEUE: QueueName = QueueName::Transcribe;
    const NAME: &'static str = "transcribe";

    fn validate(&self) -> Result<(), String> {
        require_non_empty("mediaFileId", &self.media_file_id)?;
        require_non_empty("audioPath", &self.audio_path)
    }
}

/// Output container for a transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
    Mov,
    Gif,
}

impl OutputFormat {
    /// File extension (without dot).
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
            OutputFormat::Gif => "gif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

pub const MIN_DIMENSION: u32 = 16;
pub const MAX_DIMENSION: u32 = 7680;

/// Transcode a clip for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub clip_id: String,
    pub export_id: String,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub burn_subtitles: bool,
    /// Source clip file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    /// Subtitle file burned in when `burn_subtitles` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<String>,
}

impl TranscodeJob {
    pub fn new(
        clip_id: impl Into<String>,
        export_id: impl Into<String>,
        format: OutputFormat,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            clip_id: clip_id.into(),
            export_id: export_id.into(),
            format,
            width,
            height,
            burn_subtitles: false,
            input_path: None,
            subtitle_path: None,
        }
    }

    /// Set the source clip file.
    pub fn with_input(mut self, path: impl Into<String>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    /// Burn the given subtitle file into the output.
    pub fn with_subtitles(mut self, path: impl Into<String>) -> Self {
        self.burn_subtitles = true;
        self.subtitle_path = Some(path.into());
        self
    }
}

impl JobPayload for TranscodeJob {
    const QUEUE: QueueName = QueueName::Transcode;
    const NAME: &'static str = "transcode";

    fn validate(&self) -> Result<(), String> {
        require_safe_segment("clipId", &self.clip_id)?;
        require_safe_segment("exportId", &self.export_id)?;
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(format!(
                    "{} must be between {} and {}",
                    field, MIN_DIMENSION, MAX_DIMENSION
                ));
            }
            if value % 2 != 0 {
                return Err(format!("{} must be even", field));
            }
        }
        if self.burn_subtitles && self.subtitle_path.as_deref().map_or(true, str::is_empty) {
            return Err("subtitlePath is required when burnSubtitles is set".to_string());
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", field));
    }
    Ok(())
}

/// The value becomes a single path segment, so separators and `..` are rejected.
fn require_safe_segment(field: &str, value: &str) -> Result<(), String> {
    require_non_empty(field, value)?;
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(format!("{} must be a plain file name", field));
    }
    Ok(())
}
