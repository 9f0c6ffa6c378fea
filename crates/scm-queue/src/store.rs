//! Backing store abstraction.
//!
//! Every method is one atomic transition of a single job (or of one queue
//! bucket for the maintenance calls). Workers hold no application lock while
//! a stage runs; ownership is tracked by the lock token stamped at claim time.

use std::time::Duration;

use async_trait::async_trait;

use scm_models::{JobCounts, JobId, JobState, QueueName};

use crate::error::QueueResult;
use crate::job::Job;
use crate::policy::Retention;

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job will be retried after `delay`.
    Retrying { attempts_made: u32, delay: Duration },
    /// Attempts exhausted; the job is permanently failed.
    Failed { attempts_made: u32 },
}

impl FailOutcome {
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailOutcome::Failed { .. })
    }
}

/// Result of a stalled-job sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StalledReport {
    /// Jobs moved straight back to waiting
    pub requeued: u64,
    /// Jobs charged an attempt and delayed for retry
    pub retried: u64,
    /// Jobs with no attempts left
    pub failed: u64,
}

impl StalledReport {
    pub fn total(&self) -> u64 {
        self.requeued + self.retried + self.failed
    }
}

/// Failure reason recorded on jobs that stalled more than allowed.
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a waiting job at the back of its queue.
    ///
    /// Returns false, leaving the store untouched, when a job with the same
    /// id already exists in the queue.
    async fn enqueue(&self, job: &Job) -> QueueResult<bool>;

    /// Move the oldest waiting job to active, locking it for `lock_ttl`.
    async fn claim(
        &self,
        queue: QueueName,
        token: &str,
        lock_ttl: Duration,
        now: i64,
    ) -> QueueResult<Option<Job>>;

    /// Renew the lock of an active job. Returns false once the lock is lost.
    async fn extend_lock(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        lock_ttl: Duration,
        now: i64,
    ) -> QueueResult<bool>;

    /// Record progress (0-100) on an active job.
    async fn update_progress(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        progress: u8,
    ) -> QueueResult<()>;

    /// Mark an active job completed and apply retention to the completed bucket.
    async fn complete(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        result: &serde_json::Value,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<()>;

    /// Record a failed attempt: delay the job for retry or fail it permanently.
    async fn fail(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        reason: &str,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<FailOutcome>;

    /// Move delayed jobs whose backoff has elapsed back to waiting.
    async fn promote_delayed(&self, queue: QueueName, now: i64) -> QueueResult<u64>;

    /// Recover active jobs whose lock expired.
    ///
    /// The first `max_stalled` stalls of a job requeue it for free. Each stall
    /// past that is charged as a failed attempt: the job is delayed with the
    /// usual backoff, or failed with [`STALLED_REASON`] once no attempts remain.
    async fn recover_stalled(
        &self,
        queue: QueueName,
        max_stalled: u32,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<StalledReport>;

    async fn get(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>>;

    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts>;

    /// Newest-first listing of one bucket.
    async fn list(&self, queue: QueueName, state: JobState, limit: usize) -> QueueResult<Vec<Job>>;

    /// Remove all waiting and delayed jobs.
    async fn drain(&self, queue: QueueName) -> QueueResult<u64>;

    /// Remove completed or failed jobs that finished at or before `cutoff`.
    async fn clean(&self, queue: QueueName, state: JobState, cutoff: i64) -> QueueResult<u64>;

    /// Check the store is reachable.
    async fn ping(&self) -> QueueResult<()>;
}
