//! Processing endpoints: job status, producers and queue counts.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use scm_models::{
    FtpTransferJob, JobId, JobPayload, JobStatusView, QueueName, QueuesHealth, TranscodeJob,
    TranscribeJob,
};
use scm_queue::{get_status, queues_health};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// `GET /api/processing/status/:jobId`
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(missing_job_id());
    }

    let registry = state.queues.get().await?;
    let status = get_status(&registry, &JobId::from(job_id)).await?;
    Ok(Json(status))
}

/// Status route hit without an id.
pub async fn missing_job_id_handler() -> ApiError {
    missing_job_id()
}

fn missing_job_id() -> ApiError {
    ApiError::bad_request("jobId is required")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: JobId,
    pub queue: QueueName,
}

async fn enqueue<P: JobPayload>(
    state: &AppState,
    payload: &P,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let registry = state.queues.get().await?;
    let job_id = registry.enqueue(payload).await?;
    metrics::record_job_enqueued(P::QUEUE);
    info!(job_id = %job_id, queue = %P::QUEUE, "Job enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            queue: P::QUEUE,
        }),
    ))
}

/// `POST /api/processing/transfer`
pub async fn enqueue_transfer(
    State(state): State<AppState>,
    ApiJson(job): ApiJson<FtpTransferJob>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    enqueue(&state, &job).await
}

/// `POST /api/processing/transcribe`
pub async fn enqueue_transcribe(
    State(state): State<AppState>,
    ApiJson(job): ApiJson<TranscribeJob>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    enqueue(&state, &job).await
}

/// `POST /api/processing/transcode`
pub async fn enqueue_transcode(
    State(state): State<AppState>,
    ApiJson(job): ApiJson<TranscodeJob>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    enqueue(&state, &job).await
}

/// `GET /api/processing/queues`
pub async fn get_queues_health(State(state): State<AppState>) -> ApiResult<Json<QueuesHealth>> {
    let registry = state.queues.get().await?;
    let health = queues_health(&registry).await?;
    metrics::set_queue_counts(&health);
    Ok(Json(health))
}
