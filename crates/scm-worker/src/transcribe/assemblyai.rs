//! AssemblyAI: upload the audio, submit a transcript, poll until it settles.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{join_url, provider_error, Transcript};
use crate::config::ProviderEndpoint;
use crate::error::{WorkerError, WorkerResult};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    text: Option<String>,
    language_code: Option<String>,
    audio_duration: Option<f64>,
    error: Option<String>,
}

pub(super) async fn transcribe(
    client: &Client,
    endpoint: &ProviderEndpoint,
    api_key: &str,
    poll_interval: Duration,
    audio: Vec<u8>,
) -> WorkerResult<Transcript> {
    let upload_url = join_url(&endpoint.base_url, "v2/upload");
    let response = client
        .post(&upload_url)
        .header("authorization", api_key)
        .header("content-type", "application/octet-stream")
        .body(audio)
        .send()
        .await?;
    let upload: UploadResponse = json_or_error(&upload_url, response).await?;

    let submit_url = join_url(&endpoint.base_url, "v2/transcript");
    let response = client
        .post(&submit_url)
        .header("authorization", api_key)
        .json(&serde_json::json!({
            "audio_url": upload.upload_url,
            "speech_model": endpoint.model,
            "language_detection": true,
        }))
        .send()
        .await?;
    let mut transcript: TranscriptResponse = json_or_error(&submit_url, response).await?;

    let poll_url = join_url(&endpoint.base_url, &format!("v2/transcript/{}", transcript.id));
    // The stage timeout bounds this loop.
    loop {
        match transcript.status.as_str() {
            "completed" => {
                return Ok(Transcript {
                    text: transcript.text.unwrap_or_default().trim().to_string(),
                    language: transcript.language_code,
                    duration_secs: transcript.audio_duration,
                })
            }
            "error" => {
                return Err(WorkerError::transcription_failed(format!(
                    "assemblyai transcript {} failed: {}",
                    transcript.id,
                    transcript.error.unwrap_or_else(|| "unknown error".to_string())
                )))
            }
            status => debug!("AssemblyAI transcript {} is {}", transcript.id, status),
        }

        tokio::time::sleep(poll_interval).await;
        let response = client
            .get(&poll_url)
            .header("authorization", api_key)
            .send()
            .await?;
        transcript = json_or_error(&poll_url, response).await?;
    }
}

async fn json_or_error<T: serde::de::DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> WorkerResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(provider_error(url, status, &body));
    }
    Ok(response.json().await?)
}
