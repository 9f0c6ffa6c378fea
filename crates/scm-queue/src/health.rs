//! Per-queue counts and maintenance.

use std::time::Duration;

use futures::future::try_join_all;
use tracing::info;

use scm_models::{JobCounts, JobState, QueueName, QueuesHealth};

use crate::error::QueueResult;
use crate::queue::QueueRegistry;

/// Counts of every queue, queried concurrently.
pub async fn queues_health(registry: &QueueRegistry) -> QueueResult<QueuesHealth> {
    let counts = try_join_all(QueueName::ALL.into_iter().map(|name| async move {
        registry.queue(name).job_counts().await.map(|c| (name, c))
    }))
    .await?;
    Ok(counts.into_iter().collect())
}

/// What a cleanup pass removed from one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub drained: u64,
    pub completed: u64,
    pub failed: u64,
}

impl CleanReport {
    pub fn total(&self) -> u64 {
        self.drained + self.completed + self.failed
    }
}

/// Drain a queue and, unless `keep_terminal`, purge its completed and failed
/// buckets regardless of age.
pub async fn clean_queue(
    registry: &QueueRegistry,
    name: QueueName,
    keep_terminal: bool,
) -> QueueResult<CleanReport> {
    let queue = registry.queue(name);
    let mut report = CleanReport {
        drained: queue.drain().await?,
        ..Default::default()
    };
    if !keep_terminal {
        report.completed = queue.clean(JobState::Completed, Duration::ZERO).await?;
        report.failed = queue.clean(JobState::Failed, Duration::ZERO).await?;
    }
    info!(queue = %name, removed = report.total(), "Queue cleanup finished");
    Ok(report)
}

/// Total pending work across all queues.
pub fn pending_total(health: &QueuesHealth) -> u64 {
    health.values().map(JobCounts::pending).sum()
}
