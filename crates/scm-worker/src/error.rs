//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Stage timed out after {0} seconds")]
    Timeout(u64),

    #[error("Workers already started")]
    AlreadyStarted,

    #[error("{0}")]
    Media(#[from] scm_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] scm_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    pub fn transcription_failed(msg: impl Into<String>) -> Self {
        Self::TranscriptionFailed(msg.into())
    }

    pub fn transcode_failed(msg: impl Into<String>) -> Self {
        Self::TranscodeFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// True when the job's lock was taken away while the stage ran.
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, WorkerError::Queue(scm_queue::QueueError::LockLost(_)))
    }
}
