//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use scm_models::{JobId, QueueName};

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job id, its queue and the attempt number.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    queue: QueueName,
    attempt: u32,
}

impl JobLogger {
    /// `attempt` is 1-based.
    pub fn new(job_id: &JobId, queue: QueueName, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            queue,
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Span wrapping the whole attempt, so stage-level logs inherit the job fields.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            queue = %self.queue,
            attempt = self.attempt
        )
    }
}
