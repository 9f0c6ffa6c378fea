//! Shared data models for the media processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, queue names and lifecycle states
//! - Stage payloads (FTP transfer, transcription, transcoding)
//! - Stage results
//! - Status and health views returned to API clients

pub mod job;
pub mod payload;
pub mod result;
pub mod status;

pub use job::{JobId, JobState, QueueName, UnknownQueueName};
pub use payload::{
    FtpTransferJob, JobPayload, OutputFormat, TranscodeJob, TranscribeJob, TranscriptionProvider,
};
pub use result::{TranscodeResult, TranscriptResult, TransferResult};
pub use status::{JobCounts, JobStatusView, QueuesHealth};
