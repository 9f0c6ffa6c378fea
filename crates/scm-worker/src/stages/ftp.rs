//! FTP transfer stage: fetch the upload, then queue its transcription.

use scm_models::{FtpTransferJob, JobId, TranscribeJob, TransferResult};
use scm_queue::{Job, JobOptions};

use super::{ProgressReporter, StageContext};
use crate::error::WorkerResult;

/// Id of the transcribe job queued by a transfer job.
///
/// Derived from the transfer job id, so a retried attempt that already
/// enqueued it finds the existing job instead of adding a second one.
pub(crate) fn downstream_id(transfer_id: &JobId) -> JobId {
    JobId::from_string(format!("{}-transcribe", transfer_id))
}

pub(super) async fn run(
    ctx: &StageContext,
    job: &Job,
    payload: &FtpTransferJob,
    progress: &ProgressReporter,
) -> WorkerResult<TransferResult> {
    let dest = ctx
        .config
        .media_dir
        .join(&payload.media_file_id)
        .join(&payload.filename);

    progress.report(10).await?;
    let bytes = ctx.config.transfer.fetch(&payload.vps_path, &dest).await?;
    progress.report(90).await?;

    let audio_path = dest.to_string_lossy().to_string();
    let next = TranscribeJob::new(
        payload.media_file_id.clone(),
        audio_path.clone(),
        ctx.config.providers.default_provider,
    );
    let transcribe_job_id = ctx
        .registry
        .transcribe()
        .add_with(&next, JobOptions::default().with_job_id(downstream_id(&job.id)))
        .await?;

    progress.report(100).await?;
    progress
        .logger()
        .log_completion(&format!("{} bytes to {}, queued {}", bytes, audio_path, transcribe_job_id));

    Ok(TransferResult {
        media_file_id: payload.media_file_id.clone(),
        local_path: audio_path,
        bytes,
        transcribe_job_id,
    })
}
