//! Status aggregator: locate a job by id across all queues.

use scm_models::{JobId, JobStatusView, QueueName};
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::queue::QueueRegistry;

/// Probe the queues in [`QueueName::ALL`] order and return the first match.
pub async fn find_status(registry: &QueueRegistry, id: &JobId) -> QueueResult<Option<JobStatusView>> {
    for name in QueueName::ALL {
        if let Some(job) = registry.queue(name).get_job(id).await? {
            debug!(job_id = %id, queue = %name, state = %job.state, "Found job");
            return Ok(Some(job.to_status_view()));
        }
    }
    Ok(None)
}

/// Like [`find_status`], but an unknown id is a [`QueueError::JobNotFound`].
pub async fn get_status(registry: &QueueRegistry, id: &JobId) -> QueueResult<JobStatusView> {
    find_status(registry, id)
        .await?
        .ok_or_else(|| QueueError::job_not_found(id.as_str()))
}
