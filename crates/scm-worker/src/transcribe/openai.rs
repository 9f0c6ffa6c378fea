//! OpenAI-compatible `audio/transcriptions` endpoint (Groq, DeepSeek).

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{join_url, provider_error, Transcript};
use crate::config::ProviderEndpoint;
use crate::error::WorkerResult;

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    language: Option<String>,
    duration: Option<f64>,
}

pub(super) async fn transcribe(
    client: &Client,
    endpoint: &ProviderEndpoint,
    api_key: &str,
    audio: Vec<u8>,
    filename: String,
) -> WorkerResult<Transcript> {
    let url = join_url(&endpoint.base_url, "audio/transcriptions");
    debug!("Uploading {} ({} bytes) to {}", filename, audio.len(), url);

    let file = Part::bytes(audio)
        .file_name(filename)
        .mime_str("application/octet-stream")?;
    let form = Form::new()
        .part("file", file)
        .text("model", endpoint.model.clone())
        .text("response_format", "verbose_json");

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(provider_error(&url, status, &body));
    }

    let body: VerboseTranscription = response.json().await?;
    Ok(Transcript {
        text: body.text.trim().to_string(),
        language: body.language,
        duration_secs: body.duration,
    })
}
