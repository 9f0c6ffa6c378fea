//! Stored job record.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use scm_models::{JobId, JobPayload, JobState, JobStatusView, QueueName};

use crate::error::{QueueError, QueueResult};
use crate::policy::JobPolicy;

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A job as held by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub name: String,
    /// Payload JSON
    pub data: serde_json::Value,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds
    pub backoff_ms: u64,
    pub stalled_count: u32,
    /// Enqueue time, epoch ms
    pub timestamp: i64,
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    /// Lock token of the worker holding the job
    #[serde(skip)]
    pub token: Option<String>,
}

impl Job {
    /// Build a waiting job for a payload.
    pub fn from_payload<P: JobPayload>(
        id: JobId,
        payload: &P,
        attempts: u32,
        backoff_ms: u64,
        timestamp: i64,
    ) -> QueueResult<Self> {
        Ok(Self {
            id,
            queue: P::QUEUE,
            name: P::NAME.to_string(),
            data: serde_json::to_value(payload)?,
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            max_attempts: attempts.max(1),
            backoff_ms,
            stalled_count: 0,
            timestamp,
            processed_on: None,
            finished_on: None,
            result: None,
            failed_reason: None,
            token: None,
        })
    }

    /// Build a waiting job with the queue's default policy.
    pub fn with_policy<P: JobPayload>(payload: &P, policy: &JobPolicy) -> QueueResult<Self> {
        Self::from_payload(
            JobId::new(),
            payload,
            policy.attempts,
            policy.backoff.base_delay.as_millis() as u64,
            now_ms(),
        )
    }

    /// Decode the payload.
    pub fn payload<P: JobPayload>(&self) -> QueueResult<P> {
        if P::QUEUE != self.queue {
            return Err(QueueError::WrongQueue {
                expected: P::QUEUE,
                actual: self.queue,
            });
        }
        serde_json::from_value(self.data.clone()).map_err(QueueError::from)
    }

    /// True when another failure would exhaust the attempt budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts_made + 1 >= self.max_attempts
    }

    /// Normalized view for status queries.
    ///
    /// `result` is only exposed for completed jobs, `failed_reason` only for failed ones.
    pub fn to_status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            queue: self.queue,
            state: self.state,
            progress: self.progress,
            data: self.data.clone(),
            timestamp: self.timestamp,
            result: match self.state {
                JobState::Completed => self.result.clone(),
                _ => None,
            },
            failed_reason: match self.state {
                JobState::Failed => self.failed_reason.clone(),
                _ => None,
            },
        }
    }

    /// Flatten into Redis hash fields.
    pub(crate) fn to_fields(&self) -> QueueResult<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("id", self.id.to_string()),
            ("name", self.name.clone()),
            ("data", serde_json::to_string(&self.data)?),
            ("state", self.state.as_str().to_string()),
            ("progress", self.progress.to_string()),
            ("attemptsMade", self.attempts_made.to_string()),
            ("maxAttempts", self.max_attempts.to_string()),
            ("backoffMs", self.backoff_ms.to_string()),
            ("stalledCount", self.stalled_count.to_string()),
            ("timestamp", self.timestamp.to_string()),
        ];
        if let Some(ts) = self.processed_on {
            fields.push(("processedOn", ts.to_string()));
        }
        if let Some(ts) = self.finished_on {
            fields.push(("finishedOn", ts.to_string()));
        }
        if let Some(result) = &self.result {
            fields.push(("result", serde_json::to_string(result)?));
        }
        if let Some(reason) = &self.failed_reason {
            fields.push(("failedReason", reason.clone()));
        }
        Ok(fields)
    }

    /// Rebuild from Redis hash fields.
    pub(crate) fn from_fields(queue: QueueName, fields: &HashMap<String, String>) -> QueueResult<Self> {
        let get = |key: &str| fields.get(key).map(String::as_str);
        let required = |key: &str| {
            get(key).ok_or_else(|| QueueError::serialization(format!("job hash missing '{}'", key)))
        };
        let number = |key: &str| get(key).and_then(|v| v.parse::<i64>().ok());

        let state = required("state")?
            .parse::<JobState>()
            .map_err(QueueError::serialization)?;

        Ok(Self {
            id: JobId::from_string(required("id")?),
            queue,
            name: get("name").unwrap_or_default().to_string(),
            data: serde_json::from_str(required("data")?)?,
            state,
            progress: number("progress").unwrap_or(0).clamp(0, 100) as u8,
            attempts_made: number("attemptsMade").unwrap_or(0).max(0) as u32,
            max_attempts: number("maxAttempts").unwrap_or(1).max(1) as u32,
            backoff_ms: number("backoffMs").unwrap_or(0).max(0) as u64,
            stalled_count: number("stalledCount").unwrap_or(0).max(0) as u32,
            timestamp: number("timestamp").unwrap_or(0),
            processed_on: number("processedOn"),
            finished_on: number("finishedOn"),
            result: get("result")
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?,
            failed_reason: get("failedReason").map(str::to_string),
            token: get("token").map(str::to_string),
        })
    }
}
