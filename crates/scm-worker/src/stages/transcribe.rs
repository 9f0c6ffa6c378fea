//! Transcription stage. Nothing is queued downstream; exports are a user action.

use std::path::Path;

use scm_models::{TranscribeJob, TranscriptResult};

use super::{ProgressReporter, StageContext};
use crate::error::WorkerResult;

pub(super) async fn run(
    ctx: &StageContext,
    payload: &TranscribeJob,
    progress: &ProgressReporter,
) -> WorkerResult<TranscriptResult> {
    progress.report(10).await?;

    let transcript = ctx
        .transcriber
        .transcribe(payload.provider, Path::new(&payload.audio_path))
        .await?;

    progress.report(100).await?;
    progress.logger().log_completion(&format!(
        "{} characters via {}",
        transcript.text.len(),
        payload.provider
    ));

    Ok(TranscriptResult {
        media_file_id: payload.media_file_id.clone(),
        provider: payload.provider,
        text: transcript.text,
        language: transcript.language,
        duration_secs: transcript.duration_secs,
    })
}
