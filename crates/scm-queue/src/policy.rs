//! Retry, backoff and retention policy shared by all queues.

use std::time::Duration;

use scm_models::JobId;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl Backoff {
    pub fn exponential(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before the next attempt once `attempts_made` attempts have failed.
    ///
    /// `base * 2^(attempts_made - 1)`, saturating.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        delay_ms(self.base_delay.as_millis() as u64, attempts_made)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(2000))
    }
}

/// Backoff in milliseconds, the form stored on jobs.
pub(crate) fn delay_ms(base_ms: u64, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(32);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

/// Terminal-bucket retention: keep the newest `count` jobs, none older than `age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub count: u64,
    pub age: Duration,
}

impl Retention {
    pub fn new(count: u64, age: Duration) -> Self {
        Self { count, age }
    }

    pub(crate) fn age_ms(&self) -> i64 {
        self.age.as_millis().min(i64::MAX as u128) as i64
    }
}

/// Default policy applied to every job of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPolicy {
    /// Maximum attempts, including the first
    pub attempts: u32,
    pub backoff: Backoff,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            remove_on_complete: Retention::new(100, Duration::from_secs(24 * 3600)),
            remove_on_fail: Retention::new(50, Duration::from_secs(7 * 24 * 3600)),
        }
    }
}

/// Per-job overrides of the queue policy.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub job_id: Option<JobId>,
    pub attempts: Option<u32>,
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    pub fn with_job_id(mut self, id: JobId) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }
}
