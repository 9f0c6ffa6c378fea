//! Pipeline stages, one per queue.

mod ftp;
mod transcode;
mod transcribe;

use std::sync::Arc;

use scm_models::QueueName;
use scm_queue::{Job, Queue, QueueRegistry};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::transcribe::Transcriber;

pub use transcode::{export_path, public_url};

/// Everything a stage needs besides its job.
#[derive(Clone)]
pub struct StageContext {
    pub registry: Arc<QueueRegistry>,
    pub config: Arc<WorkerConfig>,
    pub transcriber: Arc<dyn Transcriber>,
}

/// Reports progress for the job a worker currently holds.
#[derive(Clone)]
pub struct ProgressReporter {
    queue: Queue,
    job: Job,
    token: String,
    logger: JobLogger,
}

impl ProgressReporter {
    pub(crate) fn new(queue: Queue, job: Job, token: String, logger: JobLogger) -> Self {
        Self {
            queue,
            job,
            token,
            logger,
        }
    }

    /// Record progress (0-100). Fails once the job's lock is lost.
    pub async fn report(&self, progress: u8) -> WorkerResult<()> {
        self.queue
            .update_progress(&self.job.id, &self.token, progress)
            .await?;
        self.logger.log_progress(&format!("{}%", progress));
        Ok(())
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }
}

/// Run the stage for `job` and return its result as JSON.
pub(crate) async fn run_stage(
    ctx: &StageContext,
    job: &Job,
    progress: &ProgressReporter,
) -> WorkerResult<serde_json::Value> {
    let result = match job.queue {
        QueueName::FtpTransfer => serde_json::to_value(ftp::run(ctx, job, &decode(job)?, progress).await?),
        QueueName::Transcribe => serde_json::to_value(transcribe::run(ctx, &decode(job)?, progress).await?),
        QueueName::Transcode => serde_json::to_value(transcode::run(ctx, &decode(job)?, progress).await?),
    };
    result.map_err(|e| WorkerError::invalid_payload(format!("result is not serializable: {}", e)))
}

/// Decode and validate the payload of a claimed job.
fn decode<P: scm_models::JobPayload>(job: &Job) -> WorkerResult<P> {
    let payload: P = job
        .payload()
        .map_err(|e| WorkerError::invalid_payload(e.to_string()))?;
    payload.validate().map_err(WorkerError::invalid_payload)?;
    Ok(payload)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scm_models::TranscriptionProvider;

    use crate::transcribe::Transcript;

    use super::*;

    /// Transcriber that fails a fixed number of times, then returns `text`.
    pub struct ScriptedTranscriber {
        pub failures: usize,
        pub text: String,
        pub calls: AtomicUsize,
        /// Time each call takes before answering
        pub latency: Duration,
    }

    impl ScriptedTranscriber {
        pub fn new(failures: usize, text: &str) -> Self {
            Self {
                failures,
                text: text.to_string(),
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }
    }

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(&self, _provider: TranscriptionProvider, audio: &Path) -> WorkerResult<Transcript> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if call < self.failures {
                return Err(WorkerError::transcription_failed("provider unavailable"));
            }
            if !audio.exists() {
                return Err(WorkerError::transcription_failed("audio missing"));
            }
            Ok(Transcript {
                text: self.text.clone(),
                language: Some("en".to_string()),
                duration_secs: Some(1.0),
            })
        }
    }
}
