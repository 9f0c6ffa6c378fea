//! Per-queue consumer loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use scm_models::QueueName;
use scm_queue::{FailOutcome, Job, Queue};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::stages::{run_stage, ProgressReporter, StageContext};

/// Consumer bound to one queue.
pub struct StageWorker {
    queue: Queue,
    ctx: StageContext,
    job_semaphore: Arc<Semaphore>,
    consumer_name: String,
}

impl StageWorker {
    pub fn new(name: QueueName, ctx: StageContext) -> Self {
        let queue = ctx.registry.queue(name).clone();
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.concurrency.max(1)));
        let consumer_name = format!("{}-worker-{}", name, Uuid::new_v4());

        Self {
            queue,
            ctx,
            job_semaphore,
            consumer_name,
        }
    }

    pub fn queue_name(&self) -> QueueName {
        self.queue.name()
    }

    /// Consume jobs until `shutdown` flips to true, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let config = Arc::clone(&self.ctx.config);
        info!(
            "Starting '{}' with {} concurrent jobs",
            self.consumer_name, config.concurrency
        );

        let mut stalled_sweep = tokio::time::interval(config.stalled_interval);
        stalled_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = stalled_sweep.tick() => {
                    self.recover_stalled().await;
                    continue;
                }
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.claim_next().await {
                Ok(Some((job, token))) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        worker.execute_job(job, token, permit).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(queue = %self.queue.name(), "Error claiming jobs: {}", e);
                    // Back off on error
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(config.poll_interval.max(Duration::from_secs(1))) => {}
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                queue = %self.queue.name(),
                "In-flight jobs still running after {:?}; their locks will expire and they will be requeued",
                config.shutdown_timeout
            );
        }
        info!("'{}' stopped", self.consumer_name);
    }

    /// Claim and run one job inline. Returns false when the queue had nothing ready.
    pub async fn process_next(&self) -> WorkerResult<bool> {
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::config_error("worker semaphore closed"))?;
        match self.claim_next().await? {
            Some((job, token)) => {
                self.execute_job(job, token, permit).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Promote due retries, then claim the oldest waiting job.
    async fn claim_next(&self) -> WorkerResult<Option<(Job, String)>> {
        let promoted = self.queue.promote_delayed().await?;
        if promoted > 0 {
            debug!(queue = %self.queue.name(), promoted, "Promoted delayed jobs");
        }

        let token = format!("{}:{}", self.consumer_name, Uuid::new_v4());
        let job = self
            .queue
            .claim(&token, self.ctx.config.lock_duration)
            .await?;
        Ok(job.map(|job| (job, token)))
    }

    async fn recover_stalled(&self) {
        match self.queue.recover_stalled(self.ctx.config.max_stalled).await {
            Ok(report) if report.total() > 0 => warn!(
                queue = %self.queue.name(),
                requeued = report.requeued,
                retried = report.retried,
                failed = report.failed,
                "Recovered stalled jobs"
            ),
            Ok(_) => {}
            Err(e) => warn!(queue = %self.queue.name(), "Stalled job sweep failed: {}", e),
        }
    }

    /// Run one claimed job to completion or failure.
    async fn execute_job(&self, job: Job, token: String, permit: OwnedSemaphorePermit) {
        let _permit = permit;
        let logger = JobLogger::new(&job.id, self.queue.name(), job.attempts_made + 1);
        let span = logger.create_span();

        async {
            logger.log_start(&format!("{} job", job.name));
            let started = Instant::now();

            let heartbeat = self.spawn_heartbeat(&job, &token, &logger);
            let reporter = ProgressReporter::new(self.queue.clone(), job.clone(), token.clone(), logger.clone());
            let timeout = self.ctx.config.stage_timeout(self.queue.name());

            let result = match tokio::time::timeout(timeout, run_stage(&self.ctx, &job, &reporter)).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout(timeout.as_secs())),
            };
            heartbeat.abort();

            metrics::record_duration(self.queue.name(), started.elapsed());
            match result {
                Ok(value) => self.finish_success(&job, &token, &value, &logger).await,
                Err(e) => self.finish_failure(&job, &token, &e, &logger).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn finish_success(&self, job: &Job, token: &str, value: &serde_json::Value, logger: &JobLogger) {
        match self.queue.complete(&job.id, token, value).await {
            Ok(()) => {
                metrics::record_completed(self.queue.name());
                logger.log_completion("result stored");
            }
            // Lock lost: another worker owns the job now.
            Err(e) => logger.log_error(&format!("could not record completion: {}", e)),
        }
    }

    async fn finish_failure(&self, job: &Job, token: &str, err: &WorkerError, logger: &JobLogger) {
        logger.log_error(&err.to_string());
        if err.is_lock_lost() {
            return;
        }

        match self.queue.fail(&job.id, token, &err.to_string()).await {
            Ok(outcome) => {
                metrics::record_failed(self.queue.name(), outcome.is_permanent());
                match outcome {
                    FailOutcome::Retrying { attempts_made, delay } => logger.log_warning(&format!(
                        "attempt {}/{} failed, retrying in {:?}",
                        attempts_made, job.max_attempts, delay
                    )),
                    FailOutcome::Failed { attempts_made } => logger.log_error(&format!(
                        "failed permanently after {} attempts",
                        attempts_made
                    )),
                }
            }
            Err(e) => logger.log_error(&format!("could not record failure: {}", e)),
        }
    }

    /// Renew the job lock every half lock duration until aborted or the lock is lost.
    fn spawn_heartbeat(&self, job: &Job, token: &str, logger: &JobLogger) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let id = job.id.clone();
        let token = token.to_string();
        let logger = logger.clone();
        let lock_duration = self.ctx.config.lock_duration;
        let period = self.ctx.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match queue.extend_lock(&id, &token, lock_duration).await {
                    Ok(true) => {}
                    Ok(false) => {
                        logger.log_warning("lock lost; job will be recovered by the stalled sweep");
                        break;
                    }
                    Err(e) => logger.log_warning(&format!("lock renewal failed: {}", e)),
                }
            }
        })
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        let total = self.ctx.config.concurrency.max(1);
        loop {
            if self.job_semaphore.available_permits() == total {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::stages::testing::ScriptedTranscriber;
    use scm_models::{FtpTransferJob, JobCounts, JobId, JobState, TranscribeJob, TranscriptionProvider};
    use scm_queue::{
        get_status, Backoff, JobPolicy, JobStore, MemoryStore, QueueError, QueueRegistry, QueueResult,
        Retention, StalledReport,
    };
    use tempfile::TempDir;

    struct Harness {
        dir: TempDir,
        registry: Arc<QueueRegistry>,
        ctx: StageContext,
    }

    impl Harness {
        fn new(transcriber: ScriptedTranscriber) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let policy = JobPolicy {
                backoff: Backoff::exponential(Duration::ZERO),
                ..Default::default()
            };
            let registry = Arc::new(QueueRegistry::new(Arc::new(MemoryStore::new()), policy));
            let config = WorkerConfig {
                media_dir: dir.path().join("media"),
                export_dir: dir.path().join("exports"),
                ..Default::default()
            };
            let ctx = StageContext {
                registry: Arc::clone(&registry),
                config: Arc::new(config),
                transcriber: Arc::new(transcriber),
            };
            Self { dir, registry, ctx }
        }

        fn worker(&self, name: QueueName) -> StageWorker {
            StageWorker::new(name, self.ctx.clone())
        }

        fn upload(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"RIFF----WAVEfmt data").unwrap();
            path
        }
    }

    #[tokio::test]
    async fn transfer_completes_and_queues_one_transcription() {
        let h = Harness::new(ScriptedTranscriber::new(0, "hello"));
        let src = h.upload("m1.wav");
        let id = h
            .registry
            .enqueue(&FtpTransferJob::new("m1", src.to_str().unwrap(), "m1.wav"))
            .await
            .unwrap();

        assert!(h.worker(QueueName::FtpTransfer).process_next().await.unwrap());

        let status = get_status(&h.registry, &id).await.unwrap();
        assert_eq!(status.queue, QueueName::FtpTransfer);
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        let result = status.result.unwrap();
        let dest = h.dir.path().join("media/m1/m1.wav");
        assert_eq!(result["localPath"], &*dest.to_string_lossy());
        assert!(dest.exists());

        let waiting = h
            .registry
            .transcribe()
            .sample(JobState::Waiting, 10)
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        let next: TranscribeJob = waiting[0].payload().unwrap();
        assert_eq!(next.media_file_id, "m1");
        assert_eq!(next.audio_path, dest.to_string_lossy());
        assert_eq!(result["transcribeJobId"], waiting[0].id.as_str());
    }

    #[tokio::test]
    async fn transfer_failing_every_attempt_ends_failed_without_downstream() {
        let h = Harness::new(ScriptedTranscriber::new(0, "hello"));
        let id = h
            .registry
            .enqueue(&FtpTransferJob::new("m1", "/nonexistent/m1.wav", "m1.wav"))
            .await
            .unwrap();
        let worker = h.worker(QueueName::FtpTransfer);

        for _ in 0..3 {
            assert!(worker.process_next().await.unwrap());
        }
        assert!(!worker.process_next().await.unwrap());

        let status = get_status(&h.registry, &id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        let reason = status.failed_reason.unwrap();
        assert!(reason.starts_with("Transfer failed"), "{}", reason);

        let job = h.registry.ftp_transfer().get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 3);
        assert_eq!(
            h.registry.transcribe().job_counts().await.unwrap(),
            Default::default()
        );
    }

    #[tokio::test]
    async fn transient_provider_failures_are_retried_to_completion() {
        let h = Harness::new(ScriptedTranscriber::new(2, "bonjour"));
        let audio = h.upload("m2.wav");
        let id = h
            .registry
            .enqueue(&TranscribeJob::new("m2", audio.to_str().unwrap(), TranscriptionProvider::Groq))
            .await
            .unwrap();
        let worker = h.worker(QueueName::Transcribe);

        for _ in 0..3 {
            assert!(worker.process_next().await.unwrap());
        }

        let status = get_status(&h.registry, &id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.result.unwrap()["text"], "bonjour");
        assert_eq!(h.registry.queue(QueueName::Transcode).job_counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn missing_clip_fails_the_attempt() {
        let h = Harness::new(ScriptedTranscriber::new(0, "x"));
        let id = h
            .registry
            .transcode()
            .add_with(
                &scm_models::TranscodeJob::new("c1", "e1", scm_models::OutputFormat::Mp4, 1080, 1920),
                scm_queue::JobOptions::default().with_attempts(1),
            )
            .await
            .unwrap();

        // The clip file does not exist, so the stage fails before ffmpeg runs.
        assert!(h.worker(QueueName::Transcode).process_next().await.unwrap());
        let status = get_status(&h.registry, &id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.failed_reason.unwrap().contains("c1.mp4"));
    }

    #[tokio::test]
    async fn stage_exceeding_its_time_limit_fails_the_attempt() {
        let transcriber = ScriptedTranscriber::new(0, "late").with_latency(Duration::from_secs(30));
        let mut h = Harness::new(transcriber);
        h.ctx.config = Arc::new(WorkerConfig {
            transcribe_timeout: Duration::from_millis(50),
            ..(*h.ctx.config).clone()
        });
        let audio = h.upload("m3.wav");
        let id = h
            .registry
            .transcribe()
            .add_with(
                &TranscribeJob::new("m3", audio.to_str().unwrap(), TranscriptionProvider::Groq),
                scm_queue::JobOptions::default().with_attempts(1),
            )
            .await
            .unwrap();

        let worker = h.worker(QueueName::Transcribe);
        let run = worker.process_next();
        assert!(tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap());

        let status = get_status(&h.registry, &id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.failed_reason.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let h = Harness::new(ScriptedTranscriber::new(0, "x"));
        let worker = Arc::new(h.worker(QueueName::Transcribe));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&worker).run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops")
            .unwrap();
    }

    /// Store whose every call fails, as when Redis is down.
    struct DownStore;

    fn down<T>() -> QueueResult<T> {
        Err(QueueError::connection_failed("connection refused"))
    }

    #[async_trait::async_trait]
    impl JobStore for DownStore {
        async fn enqueue(&self, _: &Job) -> QueueResult<bool> {
            down()
        }
        async fn claim(&self, _: QueueName, _: &str, _: Duration, _: i64) -> QueueResult<Option<Job>> {
            down()
        }
        async fn extend_lock(
            &self,
            _: QueueName,
            _: &JobId,
            _: &str,
            _: Duration,
            _: i64,
        ) -> QueueResult<bool> {
            down()
        }
        async fn update_progress(&self, _: QueueName, _: &JobId, _: &str, _: u8) -> QueueResult<()> {
            down()
        }
        async fn complete(
            &self,
            _: QueueName,
            _: &JobId,
            _: &str,
            _: &serde_json::Value,
            _: &Retention,
            _: i64,
        ) -> QueueResult<()> {
            down()
        }
        async fn fail(
            &self,
            _: QueueName,
            _: &JobId,
            _: &str,
            _: &str,
            _: &Retention,
            _: i64,
        ) -> QueueResult<FailOutcome> {
            down()
        }
        async fn promote_delayed(&self, _: QueueName, _: i64) -> QueueResult<u64> {
            down()
        }
        async fn recover_stalled(
            &self,
            _: QueueName,
            _: u32,
            _: &Retention,
            _: i64,
        ) -> QueueResult<StalledReport> {
            down()
        }
        async fn get(&self, _: QueueName, _: &JobId) -> QueueResult<Option<Job>> {
            down()
        }
        async fn counts(&self, _: QueueName) -> QueueResult<JobCounts> {
            down()
        }
        async fn list(&self, _: QueueName, _: JobState, _: usize) -> QueueResult<Vec<Job>> {
            down()
        }
        async fn drain(&self, _: QueueName) -> QueueResult<u64> {
            down()
        }
        async fn clean(&self, _: QueueName, _: JobState, _: i64) -> QueueResult<u64> {
            down()
        }
        async fn ping(&self) -> QueueResult<()> {
            down()
        }
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown_while_backing_off_from_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(QueueRegistry::new(Arc::new(DownStore), JobPolicy::default()));
        let config = WorkerConfig {
            media_dir: dir.path().join("media"),
            export_dir: dir.path().join("exports"),
            poll_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let ctx = StageContext {
            registry,
            config: Arc::new(config),
            transcriber: Arc::new(ScriptedTranscriber::new(0, "x")),
        };
        let worker = Arc::new(StageWorker::new(QueueName::Transcode, ctx));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::clone(&worker).run(rx));
        // Let the loop hit the failing claim and start its back-off.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker stops during back-off")
            .unwrap();
    }
}
