//! Queue handles and the registry holding the three pipeline queues.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use scm_models::{JobCounts, JobId, JobPayload, JobState, QueueName};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{now_ms, Job};
use crate::memory_store::MemoryStore;
use crate::policy::{JobOptions, JobPolicy};
use crate::redis_store::RedisStore;
use crate::store::{FailOutcome, JobStore, StalledReport};

/// Handle to one named queue.
#[derive(Clone)]
pub struct Queue {
    name: QueueName,
    store: Arc<dyn JobStore>,
    policy: JobPolicy,
}

impl Queue {
    pub fn new(name: QueueName, store: Arc<dyn JobStore>, policy: JobPolicy) -> Self {
        Self { name, store, policy }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    /// Enqueue a payload with the queue's default policy.
    pub async fn add<P: JobPayload>(&self, payload: &P) -> QueueResult<JobId> {
        self.add_with(payload, JobOptions::default()).await
    }

    /// Enqueue a payload, overriding attempts, backoff or the job id.
    ///
    /// An explicit job id that already exists is not enqueued again; the
    /// existing id is returned. The check and the insert are one store call,
    /// so concurrent producers still create a single job.
    pub async fn add_with<P: JobPayload>(&self, payload: &P, opts: JobOptions) -> QueueResult<JobId> {
        if P::QUEUE != self.name {
            return Err(QueueError::WrongQueue {
                expected: P::QUEUE,
                actual: self.name,
            });
        }
        payload.validate().map_err(QueueError::invalid_payload)?;

        let backoff = opts.backoff.unwrap_or(self.policy.backoff);
        let job = Job::from_payload(
            opts.job_id.unwrap_or_default(),
            payload,
            opts.attempts.unwrap_or(self.policy.attempts),
            backoff.base_delay.as_millis() as u64,
            now_ms(),
        )?;

        if !self.store.enqueue(&job).await? {
            debug!(job_id = %job.id, queue = %self.name, "Job already exists, skipping enqueue");
            return Ok(job.id);
        }
        info!(job_id = %job.id, queue = %self.name, "Enqueued {} job", P::NAME);
        Ok(job.id)
    }

    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<Job>> {
        self.store.get(self.name, id).await
    }

    pub async fn job_counts(&self) -> QueueResult<JobCounts> {
        self.store.counts(self.name).await
    }

    /// Newest-first sample of one bucket.
    pub async fn sample(&self, state: JobState, limit: usize) -> QueueResult<Vec<Job>> {
        self.store.list(self.name, state, limit).await
    }

    /// Remove every waiting and delayed job.
    pub async fn drain(&self) -> QueueResult<u64> {
        let removed = self.store.drain(self.name).await?;
        info!(queue = %self.name, removed, "Drained queue");
        Ok(removed)
    }

    /// Purge completed or failed jobs that finished more than `grace` ago.
    /// A zero grace purges the whole bucket.
    pub async fn clean(&self, state: JobState, grace: Duration) -> QueueResult<u64> {
        let grace_ms = grace.as_millis().min(i64::MAX as u128) as i64;
        let cutoff = now_ms().saturating_sub(grace_ms);
        let removed = self.store.clean(self.name, state, cutoff).await?;
        info!(queue = %self.name, state = %state, removed, "Cleaned queue bucket");
        Ok(removed)
    }

    /// Claim the oldest waiting job for the worker identified by `token`.
    pub async fn claim(&self, token: &str, lock_ttl: Duration) -> QueueResult<Option<Job>> {
        self.store.claim(self.name, token, lock_ttl, now_ms()).await
    }

    pub async fn extend_lock(&self, id: &JobId, token: &str, lock_ttl: Duration) -> QueueResult<bool> {
        self.store
            .extend_lock(self.name, id, token, lock_ttl, now_ms())
            .await
    }

    pub async fn update_progress(&self, id: &JobId, token: &str, progress: u8) -> QueueResult<()> {
        self.store
            .update_progress(self.name, id, token, progress.min(100))
            .await
    }

    /// Complete an active job with its result.
    pub async fn complete<R: Serialize>(&self, id: &JobId, token: &str, result: &R) -> QueueResult<()> {
        let value = serde_json::to_value(result)?;
        self.store
            .complete(
                self.name,
                id,
                token,
                &value,
                &self.policy.remove_on_complete,
                now_ms(),
            )
            .await
    }

    /// Record a failed attempt.
    pub async fn fail(&self, id: &JobId, token: &str, reason: &str) -> QueueResult<FailOutcome> {
        // An empty reason would read as "not failed" to status clients.
        let reason = if reason.trim().is_empty() {
            "unknown error"
        } else {
            reason
        };
        self.store
            .fail(
                self.name,
                id,
                token,
                reason,
                &self.policy.remove_on_fail,
                now_ms(),
            )
            .await
    }

    pub async fn promote_delayed(&self) -> QueueResult<u64> {
        self.store.promote_delayed(self.name, now_ms()).await
    }

    pub async fn recover_stalled(&self, max_stalled: u32) -> QueueResult<StalledReport> {
        self.store
            .recover_stalled(self.name, max_stalled, &self.policy.remove_on_fail, now_ms())
            .await
    }
}

/// The three pipeline queues over one shared store.
#[derive(Clone)]
pub struct QueueRegistry {
    store: Arc<dyn JobStore>,
    ftp_transfer: Queue,
    transcribe: Queue,
    transcode: Queue,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn JobStore>, policy: JobPolicy) -> Self {
        Self {
            ftp_transfer: Queue::new(QueueName::FtpTransfer, Arc::clone(&store), policy),
            transcribe: Queue::new(QueueName::Transcribe, Arc::clone(&store), policy),
            transcode: Queue::new(QueueName::Transcode, Arc::clone(&store), policy),
            store,
        }
    }

    /// Connect to the store named by the config.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let store: Arc<dyn JobStore> = if config.is_memory() {
            info!("Using in-memory queue store");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RedisStore::connect(&config.redis_url, config.prefix.clone()).await?)
        };
        Ok(Self::new(store, config.policy))
    }

    /// Registry over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), JobPolicy::default())
    }

    pub fn queue(&self, name: QueueName) -> &Queue {
        match name {
            QueueName::FtpTransfer => &self.ftp_transfer,
            QueueName::Transcribe => &self.transcribe,
            QueueName::Transcode => &self.transcode,
        }
    }

    pub fn ftp_transfer(&self) -> &Queue {
        &self.ftp_transfer
    }

    pub fn transcribe(&self) -> &Queue {
        &self.transcribe
    }

    pub fn transcode(&self) -> &Queue {
        &self.transcode
    }

    /// Enqueue a payload on the queue it belongs to.
    pub async fn enqueue<P: JobPayload>(&self, payload: &P) -> QueueResult<JobId> {
        self.queue(P::QUEUE).add(payload).await
    }

    pub async fn ping(&self) -> QueueResult<()> {
        self.store.ping().await
    }
}

/// Process-wide registry handle, connected on first use.
///
/// Cloned into the API state and the worker supervisor; every clone shares
/// the same connection.
#[derive(Clone)]
pub struct SharedRegistry {
    config: QueueConfig,
    cell: Arc<OnceCell<Arc<QueueRegistry>>>,
}

impl SharedRegistry {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Wrap an already-built registry.
    pub fn from_registry(registry: QueueRegistry) -> Self {
        Self {
            config: QueueConfig::in_memory(),
            cell: Arc::new(OnceCell::new_with(Some(Arc::new(registry)))),
        }
    }

    /// Connect on first call; later calls return the same registry.
    pub async fn get(&self) -> QueueResult<Arc<QueueRegistry>> {
        let registry = self
            .cell
            .get_or_try_init(|| async {
                QueueRegistry::connect(&self.config).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(registry))
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Backoff;
    use scm_models::FtpTransferJob;

    fn transfer() -> FtpTransferJob {
        FtpTransferJob::new("m1", "/tmp/m1.wav", "m1.wav")
    }

    #[tokio::test]
    async fn add_rejects_payload_for_another_queue() {
        let registry = QueueRegistry::in_memory();
        let err = registry.transcode().add(&transfer()).await.unwrap_err();
        assert!(matches!(err, QueueError::WrongQueue { .. }));
    }

    #[tokio::test]
    async fn add_validates_payload() {
        let registry = QueueRegistry::in_memory();
        let err = registry
            .enqueue(&FtpTransferJob::new("", "/tmp/m1.wav", "m1.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
        assert_eq!(registry.ftp_transfer().job_counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn add_with_applies_overrides() {
        let registry = QueueRegistry::in_memory();
        let id = registry
            .ftp_transfer()
            .add_with(
                &transfer(),
                JobOptions::default()
                    .with_attempts(5)
                    .with_backoff(Backoff::exponential(Duration::from_millis(10))),
            )
            .await
            .unwrap();

        let job = registry.ftp_transfer().get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.backoff_ms, 10);
        assert_eq!(job.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn explicit_job_id_is_not_enqueued_twice() {
        let registry = QueueRegistry::in_memory();
        let opts = JobOptions::default().with_job_id(JobId::from("fixed"));
        let q = registry.ftp_transfer();

        q.add_with(&transfer(), opts.clone()).await.unwrap();
        let again = q.add_with(&transfer(), opts).await.unwrap();

        assert_eq!(again.as_str(), "fixed");
        assert_eq!(q.job_counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn concurrent_adds_with_one_id_create_one_job() {
        let registry = QueueRegistry::in_memory();
        let q = registry.ftp_transfer();
        let opts = JobOptions::default().with_job_id(JobId::from("m1-transfer"));

        let payload = transfer();
        let adds = (0..8).map(|_| q.add_with(&payload, opts.clone()));
        let ids = futures::future::try_join_all(adds).await.unwrap();

        assert!(ids.iter().all(|id| id.as_str() == "m1-transfer"));
        assert_eq!(q.job_counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn transient_failures_converge_to_completion() {
        let registry = QueueRegistry::in_memory();
        let q = registry.ftp_transfer();
        let id = q
            .add_with(
                &transfer(),
                JobOptions::default().with_backoff(Backoff::exponential(Duration::ZERO)),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let job = q.claim("w", Duration::from_secs(30)).await.unwrap().unwrap();
            let outcome = q.fail(&job.id, "w", "connection reset").await.unwrap();
            assert!(!outcome.is_permanent());
            q.promote_delayed().await.unwrap();
        }

        let job = q.claim("w", Duration::from_secs(30)).await.unwrap().unwrap();
        q.complete(&job.id, "w", &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let done = q.get_job(&id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempts_made, 2);
    }

    #[tokio::test]
    async fn clean_with_zero_grace_purges_bucket() {
        let registry = QueueRegistry::in_memory();
        let q = registry.ftp_transfer();
        q.add(&transfer()).await.unwrap();
        let job = q.claim("w", Duration::from_secs(30)).await.unwrap().unwrap();
        q.complete(&job.id, "w", &serde_json::json!({})).await.unwrap();

        assert_eq!(q.clean(JobState::Completed, Duration::ZERO).await.unwrap(), 1);
        assert!(q.get_job(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_registry_connects_once() {
        let shared = SharedRegistry::new(QueueConfig::in_memory());
        assert!(!shared.is_connected());

        let first = shared.get().await.unwrap();
        let second = shared.clone().get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(shared.is_connected());
    }
}
