//! Transcode stage: render a clip export with ffmpeg.

use std::path::{Path, PathBuf};

use tokio::sync::watch;

use scm_media::{build_transcode_command, probe_duration, FfmpegRunner, MediaError};
use scm_models::{TranscodeJob, TranscodeResult};

use super::{ProgressReporter, StageContext};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// Output file: `<export_dir>/<exportId>/<clipId>.<ext>`.
pub fn export_path(export_dir: &Path, job: &TranscodeJob) -> PathBuf {
    export_dir
        .join(&job.export_id)
        .join(format!("{}.{}", job.clip_id, job.format.extension()))
}

/// Public URL of an export when a CDN serves the export directory.
pub fn public_url(cdn_base_url: Option<&str>, job: &TranscodeJob) -> Option<String> {
    cdn_base_url.map(|base| {
        format!(
            "{}/{}/{}.{}",
            base.trim_end_matches('/'),
            job.export_id,
            job.clip_id,
            job.format.extension()
        )
    })
}

/// Source clip; defaults to `<media_dir>/clips/<clipId>.mp4`.
fn input_path(config: &WorkerConfig, job: &TranscodeJob) -> PathBuf {
    match job.input_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => config.media_dir.join("clips").join(format!("{}.mp4", job.clip_id)),
    }
}

pub(super) async fn run(
    ctx: &StageContext,
    payload: &TranscodeJob,
    progress: &ProgressReporter,
) -> WorkerResult<TranscodeResult> {
    let input = input_path(&ctx.config, payload);
    if !tokio::fs::try_exists(&input).await? {
        return Err(MediaError::FileNotFound(input).into());
    }
    let output = export_path(&ctx.config.export_dir, payload);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = build_transcode_command(&input, &output, payload)?;

    let duration_ms = match probe_duration(&input).await {
        Ok(secs) => (secs * 1000.0) as i64,
        Err(e) => {
            progress
                .logger()
                .log_warning(&format!("cannot probe duration, progress will jump to 100: {}", e));
            0
        }
    };

    progress.report(0).await?;

    // ffmpeg reports on a sync callback; a forwarder task writes changes to the queue.
    let (pct_tx, mut pct_rx) = watch::channel(0u8);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let forwarder = {
        let progress = progress.clone();
        tokio::spawn(async move {
            while pct_rx.changed().await.is_ok() {
                let pct = *pct_rx.borrow_and_update();
                if let Err(e) = progress.report(pct).await {
                    let _ = cancel_tx.send(true);
                    return Err(e);
                }
            }
            Ok(())
        })
    };

    let runner = FfmpegRunner::new().with_cancel(cancel_rx);
    let run = runner
        .run_with_progress(&cmd, move |p| {
            // 100 is reported once the output is verified.
            let pct = p.percent(duration_ms).min(99);
            pct_tx.send_if_modified(|current| {
                if *current != pct {
                    *current = pct;
                    true
                } else {
                    false
                }
            });
        })
        .await;

    let forwarded = forwarder
        .await
        .map_err(|e| WorkerError::transcode_failed(format!("progress task failed: {}", e)))?;
    forwarded?;
    run?;

    let bytes = tokio::fs::metadata(&output).await?.len();
    if bytes == 0 {
        return Err(WorkerError::transcode_failed(format!(
            "ffmpeg produced an empty file at {}",
            output.display()
        )));
    }

    progress.report(100).await?;
    progress
        .logger()
        .log_completion(&format!("{} bytes at {}", bytes, output.display()));

    Ok(TranscodeResult {
        clip_id: payload.clip_id.clone(),
        export_id: payload.export_id.clone(),
        vps_path: output.to_string_lossy().to_string(),
        cdn_url: public_url(ctx.config.cdn_base_url.as_deref(), payload),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_models::OutputFormat;

    fn job() -> TranscodeJob {
        TranscodeJob::new("c1", "e1", OutputFormat::Webm, 1080, 1920)
    }

    #[test]
    fn export_layout() {
        assert_eq!(
            export_path(Path::new("/srv/exports"), &job()),
            PathBuf::from("/srv/exports/e1/c1.webm")
        );
        assert_eq!(
            public_url(Some("https://cdn.example.com/exports/"), &job()).as_deref(),
            Some("https://cdn.example.com/exports/e1/c1.webm")
        );
        assert_eq!(public_url(None, &job()), None);
    }

    #[test]
    fn input_defaults_to_clip_library() {
        let config = WorkerConfig {
            media_dir: PathBuf::from("/srv/media"),
            ..Default::default()
        };
        assert_eq!(input_path(&config, &job()), PathBuf::from("/srv/media/clips/c1.mp4"));
        assert_eq!(
            input_path(&config, &job().with_input("/srv/raw/c1.mov")),
            PathBuf::from("/srv/raw/c1.mov")
        );
    }
}
