//! In-process job store.
//!
//! Mirrors the Redis store's semantics behind one mutex. Used by tests and by
//! local development with `REDIS_URL=memory://`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use scm_models::{JobCounts, JobId, JobState, QueueName};

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::policy::{delay_ms, Retention};
use crate::store::{FailOutcome, JobStore, StalledReport, STALLED_REASON};

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Front is claimed next
    wait: VecDeque<JobId>,
    active: Vec<JobId>,
    /// (ready_at, id)
    delayed: Vec<(i64, JobId)>,
    /// Back is newest
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    /// id -> (token, lock expiry)
    locks: HashMap<JobId, (String, i64)>,
}

impl QueueState {
    fn active_job(&mut self, id: &JobId, token: &str) -> QueueResult<&mut Job> {
        let owned = self
            .locks
            .get(id)
            .map(|(held, _)| held == token)
            .unwrap_or(false);
        match self.jobs.get_mut(id) {
            Some(job) if job.state == JobState::Active && owned => Ok(job),
            Some(_) => Err(QueueError::lock_lost(id.as_str())),
            None => Err(QueueError::job_not_found(id.as_str())),
        }
    }

    fn release(&mut self, id: &JobId) {
        self.active.retain(|a| a != id);
        self.locks.remove(id);
    }

    fn finish_failed(&mut self, id: &JobId, reason: &str, retention: &Retention, now: i64) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.state = JobState::Failed;
            job.failed_reason = Some(reason.to_string());
            job.finished_on = Some(now);
            job.token = None;
        }
        self.failed.push_back(id.clone());
        self.retain(JobState::Failed, retention, now);
    }

    fn bucket(&mut self, state: JobState) -> &mut VecDeque<JobId> {
        match state {
            JobState::Failed => &mut self.failed,
            _ => &mut self.completed,
        }
    }

    /// Drop jobs older than the retention age, then the oldest beyond the count.
    fn retain(&mut self, state: JobState, retention: &Retention, now: i64) {
        let cutoff = now.saturating_sub(retention.age_ms());
        let jobs = std::mem::take(&mut self.jobs);
        let bucket = std::mem::take(self.bucket(state));

        let (kept, expired): (Vec<JobId>, Vec<JobId>) = bucket.into_iter().partition(|id| {
            jobs.get(id)
                .and_then(|j| j.finished_on)
                .map_or(false, |finished| finished >= cutoff)
        });
        let mut kept = VecDeque::from(kept);
        let mut removed = expired;
        while kept.len() as u64 > retention.count {
            if let Some(oldest) = kept.pop_front() {
                removed.push(oldest);
            }
        }

        self.jobs = jobs;
        for id in &removed {
            self.jobs.remove(id);
        }
        *self.bucket(state) = kept;
    }
}

/// Job store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queues: Mutex<HashMap<QueueName, QueueState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: &Job) -> QueueResult<bool> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(job.queue).or_default();
        if state.jobs.contains_key(&job.id) {
            return Ok(false);
        }
        state.wait.push_back(job.id.clone());
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(true)
    }

    async fn claim(
        &self,
        queue: QueueName,
        token: &str,
        lock_ttl: Duration,
        now: i64,
    ) -> QueueResult<Option<Job>> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        while let Some(id) = state.wait.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.state = JobState::Active;
            job.processed_on = Some(now);
            job.token = Some(token.to_string());
            let claimed = job.clone();

            state.active.push(id.clone());
            state
                .locks
                .insert(id, (token.to_string(), now + lock_ttl.as_millis() as i64));
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    async fn extend_lock(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        lock_ttl: Duration,
        now: i64,
    ) -> QueueResult<bool> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();
        match state.locks.get_mut(id) {
            Some((held, expiry)) if held == token => {
                *expiry = now + lock_ttl.as_millis() as i64;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        progress: u8,
    ) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();
        state.active_job(id, token)?.progress = progress.min(100);
        Ok(())
    }

    async fn complete(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        result: &serde_json::Value,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        let job = state.active_job(id, token)?;
        job.state = JobState::Completed;
        job.result = Some(result.clone());
        job.finished_on = Some(now);
        job.token = None;

        state.release(id);
        state.completed.push_back(id.clone());
        state.retain(JobState::Completed, retention, now);
        Ok(())
    }

    async fn fail(
        &self,
        queue: QueueName,
        id: &JobId,
        token: &str,
        reason: &str,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<FailOutcome> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        let job = state.active_job(id, token)?;
        job.attempts_made += 1;
        let attempts_made = job.attempts_made;

        if attempts_made < job.max_attempts {
            let delay = delay_ms(job.backoff_ms, attempts_made);
            job.state = JobState::Delayed;
            job.failed_reason = Some(reason.to_string());
            job.token = None;

            state.release(id);
            state.delayed.push((now + delay.as_millis() as i64, id.clone()));
            Ok(FailOutcome::Retrying { attempts_made, delay })
        } else {
            state.release(id);
            state.finish_failed(id, reason, retention, now);
            Ok(FailOutcome::Failed { attempts_made })
        }
    }

    async fn promote_delayed(&self, queue: QueueName, now: i64) -> QueueResult<u64> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        let (mut due, pending): (Vec<_>, Vec<_>) =
            state.delayed.drain(..).partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = pending;
        due.sort_by_key(|(ready_at, _)| *ready_at);

        let promoted = due.len() as u64;
        for (_, id) in due {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.state = JobState::Waiting;
                state.wait.push_back(id);
            }
        }
        Ok(promoted)
    }

    async fn recover_stalled(
        &self,
        queue: QueueName,
        max_stalled: u32,
        retention: &Retention,
        now: i64,
    ) -> QueueResult<StalledReport> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        let stalled: Vec<JobId> = state
            .active
            .iter()
            .filter(|id| state.locks.get(*id).map_or(true, |(_, expiry)| *expiry < now))
            .cloned()
            .collect();

        let mut report = StalledReport::default();
        for id in stalled {
            state.release(&id);
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.stalled_count += 1;
            job.token = None;
            if job.stalled_count <= max_stalled {
                job.state = JobState::Waiting;
                state.wait.push_front(id);
                report.requeued += 1;
                continue;
            }

            job.attempts_made += 1;
            if job.attempts_made < job.max_attempts {
                let delay = delay_ms(job.backoff_ms, job.attempts_made);
                job.state = JobState::Delayed;
                job.failed_reason = Some(STALLED_REASON.to_string());
                state.delayed.push((now + delay.as_millis() as i64, id));
                report.retried += 1;
            } else {
                state.finish_failed(&id, STALLED_REASON, retention, now);
                report.failed += 1;
            }
        }
        Ok(report)
    }

    async fn get(&self, queue: QueueName, id: &JobId) -> QueueResult<Option<Job>> {
        let queues = self.queues.lock().await;
        Ok(queues.get(&queue).and_then(|s| s.jobs.get(id)).cloned())
    }

    async fn counts(&self, queue: QueueName) -> QueueResult<JobCounts> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&queue)
            .map(|s| JobCounts {
                waiting: s.wait.len() as u64,
                active: s.active.len() as u64,
                completed: s.completed.len() as u64,
                failed: s.failed.len() as u64,
                delayed: s.delayed.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn list(&self, queue: QueueName, state: JobState, limit: usize) -> QueueResult<Vec<Job>> {
        let queues = self.queues.lock().await;
        let Some(s) = queues.get(&queue) else {
            return Ok(Vec::new());
        };

        let ids: Vec<&JobId> = match state {
            JobState::Waiting => s.wait.iter().rev().collect(),
            JobState::Active => s.active.iter().rev().collect(),
            JobState::Delayed => {
                let mut delayed: Vec<&(i64, JobId)> = s.delayed.iter().collect();
                delayed.sort_by(|a, b| b.0.cmp(&a.0));
                delayed.into_iter().map(|(_, id)| id).collect()
            }
            JobState::Completed => s.completed.iter().rev().collect(),
            JobState::Failed => s.failed.iter().rev().collect(),
        };

        Ok(ids
            .into_iter()
            .filter_map(|id| s.jobs.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn drain(&self, queue: QueueName) -> QueueResult<u64> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();

        let waiting: Vec<JobId> = state.wait.drain(..).collect();
        let delayed: Vec<JobId> = state.delayed.drain(..).map(|(_, id)| id).collect();
        let removed = (waiting.len() + delayed.len()) as u64;
        for id in waiting.iter().chain(delayed.iter()) {
            state.jobs.remove(id);
        }
        Ok(removed)
    }

    async fn clean(&self, queue: QueueName, state: JobState, cutoff: i64) -> QueueResult<u64> {
        if !state.is_terminal() {
            return Err(QueueError::invalid_payload(format!(
                "cannot clean {} jobs; only completed or failed",
                state
            )));
        }

        let mut queues = self.queues.lock().await;
        let s = queues.entry(queue).or_default();
        let jobs = std::mem::take(&mut s.jobs);
        let bucket = std::mem::take(s.bucket(state));

        let (removed, kept): (Vec<JobId>, Vec<JobId>) = bucket.into_iter().partition(|id| {
            jobs.get(id)
                .and_then(|j| j.finished_on)
                .map_or(true, |finished| finished <= cutoff)
        });

        s.jobs = jobs;
        for id in &removed {
            s.jobs.remove(id);
        }
        *s.bucket(state) = VecDeque::from(kept);
        Ok(removed.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
