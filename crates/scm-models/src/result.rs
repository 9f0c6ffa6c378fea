//! Stage results stored on completed jobs.

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::payload::TranscriptionProvider;

/// Result of a completed FTP transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub media_file_id: String,
    /// Where the file landed on the worker
    pub local_path: String,
    pub bytes: u64,
    /// Transcription job enqueued for the transferred file
    pub transcribe_job_id: JobId,
}

/// Result of a completed transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptResult {
    pub media_file_id: String,
    pub provider: TranscriptionProvider,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// Result of a completed transcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeResult {
    pub clip_id: String,
    pub export_id: String,
    /// Output file on the VPS
    pub vps_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_url: Option<String>,
    pub bytes: u64,
}
