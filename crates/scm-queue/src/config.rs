//! Queue configuration.

use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::policy::{Backoff, JobPolicy, Retention};

/// Store URL that selects the in-process store instead of Redis.
pub const MEMORY_URL: &str = "memory://";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL, or `memory://`
    pub redis_url: String,
    /// Key prefix for every queue key
    pub prefix: String,
    /// Default job policy applied to all three queues
    pub policy: JobPolicy,
}

impl QueueConfig {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            prefix: "scm".to_string(),
            policy: JobPolicy::default(),
        }
    }

    /// Config for the in-process store.
    pub fn in_memory() -> Self {
        Self::new(MEMORY_URL)
    }

    /// Create config from environment variables.
    ///
    /// `REDIS_URL` is required; everything else falls back to defaults.
    pub fn from_env() -> QueueResult<Self> {
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| QueueError::missing_config("REDIS_URL is not set"))?;

        let defaults = JobPolicy::default();
        let policy = JobPolicy {
            attempts: env_parse("QUEUE_ATTEMPTS").unwrap_or(defaults.attempts).max(1),
            backoff: env_parse("QUEUE_BACKOFF_MS")
                .map(|ms| Backoff::exponential(Duration::from_millis(ms)))
                .unwrap_or(defaults.backoff),
            remove_on_complete: Retention::new(
                env_parse("QUEUE_KEEP_COMPLETED").unwrap_or(defaults.remove_on_complete.count),
                env_parse("QUEUE_KEEP_COMPLETED_AGE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.remove_on_complete.age),
            ),
            remove_on_fail: Retention::new(
                env_parse("QUEUE_KEEP_FAILED").unwrap_or(defaults.remove_on_fail.count),
                env_parse("QUEUE_KEEP_FAILED_AGE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.remove_on_fail.age),
            ),
        };

        Ok(Self {
            redis_url,
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| "scm".to_string()),
            policy,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.redis_url == MEMORY_URL
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
