//! Transcription providers.
//!
//! Each [`TranscriptionProvider`] tag maps to exactly one strategy:
//! Groq and DeepSeek speak the OpenAI-compatible multipart API, AssemblyAI
//! uses its upload, submit and poll flow.

mod assemblyai;
mod openai;

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use scm_models::TranscriptionProvider;

use crate::config::{ProviderConfig, ProviderEndpoint};
use crate::error::{WorkerError, WorkerResult};

/// Provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Turns an audio file into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, provider: TranscriptionProvider, audio: &Path) -> WorkerResult<Transcript>;
}

/// Transcriber calling the provider HTTP APIs.
pub struct HttpTranscriber {
    client: Client,
    config: ProviderConfig,
}

impl HttpTranscriber {
    pub fn new(config: ProviderConfig) -> WorkerResult<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, provider: TranscriptionProvider, audio: &Path) -> WorkerResult<Transcript> {
        let endpoint = self.config.endpoint(provider);
        let api_key = api_key(provider, endpoint)?;
        let (bytes, filename) = read_audio(audio).await?;

        let transcript = match provider {
            TranscriptionProvider::Groq | TranscriptionProvider::Deepseek => {
                openai::transcribe(&self.client, endpoint, api_key, bytes, filename).await?
            }
            TranscriptionProvider::AssemblyAi => {
                assemblyai::transcribe(&self.client, endpoint, api_key, self.config.poll_interval, bytes)
                    .await?
            }
        };

        if transcript.text.trim().is_empty() {
            return Err(WorkerError::transcription_failed(format!(
                "{} returned an empty transcript",
                provider
            )));
        }
        Ok(transcript)
    }
}

fn api_key(provider: TranscriptionProvider, endpoint: &ProviderEndpoint) -> WorkerResult<&str> {
    endpoint.api_key.as_deref().ok_or_else(|| {
        WorkerError::config_error(format!(
            "{}_API_KEY is not set",
            provider.as_str().to_ascii_uppercase()
        ))
    })
}

async fn read_audio(path: &Path) -> WorkerResult<(Vec<u8>, String)> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        WorkerError::transcription_failed(format!("cannot read audio {}: {}", path.display(), e))
    })?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("audio")
        .to_string();
    Ok((bytes, filename))
}

/// Error for a non-success provider response, with a bounded body excerpt.
fn provider_error(what: &str, status: StatusCode, body: &str) -> WorkerError {
    let excerpt: String = body.chars().take(300).collect();
    WorkerError::transcription_failed(format!("{} returned {}: {}", what, status, excerpt.trim()))
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
