//! Status and health views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobState, QueueName};

/// Normalized status of one job, as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub queue: QueueName,
    pub state: JobState,
    /// Last progress reported by the worker (0-100)
    pub progress: u8,
    /// The job payload
    pub data: serde_json::Value,
    /// Enqueue time, epoch milliseconds
    pub timestamp: i64,
    /// Only present on completed jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Only present on failed jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

/// Job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    /// Jobs that still have work ahead of them.
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}

/// Per-queue counts keyed by queue name.
pub type QueuesHealth = BTreeMap<QueueName, JobCounts>;
