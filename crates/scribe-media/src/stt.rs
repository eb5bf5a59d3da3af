//! Speech-to-text over normalized WAV audio.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info};

use scribe_core::config::TranscriptionConfig;
use scribe_core::error::PipelineError;
use scribe_core::types::TranscriptionResult;

use crate::audio::AudioAsset;

/// Converts a normalized WAV into text in the requested language.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio: &AudioAsset,
        language: &str,
    ) -> Result<TranscriptionResult, PipelineError>;
}

/// Get the transcription API URL for a given provider.
pub fn provider_url(config: &TranscriptionConfig) -> String {
    if let Some(base) = config.base_url.as_deref() {
        return format!("{}/audio/transcriptions", base.trim_end_matches('/'));
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1/audio/transcriptions".into(),
        _ => "https://api.groq.com/openai/v1/audio/transcriptions".into(),
    }
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "whisper-1",
        _ => "whisper-large-v3",
    }
}

/// [`Transcriber`] for OpenAI-compatible `/audio/transcriptions` endpoints.
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    provider: String,
    url: String,
    api_key: String,
    model: String,
}

impl WhisperApiTranscriber {
    pub fn from_config(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        let api_key = config.resolve_api_key().with_context(|| {
            format!("No API key configured for transcription provider {}", config.provider)
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            provider: config.provider.clone(),
            url: provider_url(config),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model(&config.provider).to_string()),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn transcribe(
        &self,
        audio: &AudioAsset,
        language: &str,
    ) -> Result<TranscriptionResult, PipelineError> {
        let wav = audio.wav_bytes().await.map_err(|e| {
            PipelineError::TranscriptionFailed(format!("could not read normalized audio: {e}"))
        })?;

        debug!(url = %self.url, model = %self.model, wav_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::TranscriptionFailed(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if !language.is_empty() {
            form = form.text("language", language.to_string());
        }

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::TranscriptionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::TranscriptionFailed(format!(
                "{} API error {status}: {}",
                self.provider,
                body.trim()
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::TranscriptionFailed(e.to_string()))?;
        Ok(TranscriptionResult {
            text: text.trim().to_string(),
        })
    }
}

/// Runs blocking transcription jobs one at a time on the blocking pool.
///
/// Callers queue on an async lock, so a caller that gives up while queued
/// never starts its job or occupies a blocking thread. A job that has already
/// started runs to completion even if its caller is gone.
#[derive(Clone, Default)]
pub struct ExclusiveRunner {
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl ExclusiveRunner {
    pub async fn run<T, F>(&self, job: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.gate.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|err| PipelineError::TranscriptionFailed(format!("transcription worker failed: {err}")))?
    }
}

/// Build the configured transcriber. Model loading happens here, once.
pub fn build_transcriber(config: &TranscriptionConfig) -> anyhow::Result<Arc<dyn Transcriber>> {
    let transcriber: Arc<dyn Transcriber> = match config.provider.as_str() {
        "groq" | "openai" => Arc::new(WhisperApiTranscriber::from_config(config)?),
        #[cfg(feature = "local-whisper")]
        "local" => {
            let model_path = config
                .model_path
                .as_deref()
                .context("transcription.model_path is required for the local provider")?;
            Arc::new(crate::local::LocalWhisperTranscriber::load(
                model_path,
                config.threads,
            )?)
        }
        #[cfg(not(feature = "local-whisper"))]
        "local" => anyhow::bail!("The local provider requires building with the local-whisper feature"),
        other => anyhow::bail!("Unknown transcription provider: {other}"),
    };
    info!(provider = transcriber.name(), language = %config.language, "Transcriber ready");
    Ok(transcriber)
}
