//! In-process Whisper inference through whisper.cpp.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use scribe_core::error::PipelineError;
use scribe_core::types::TranscriptionResult;

use crate::audio::{AudioAsset, TARGET_SAMPLE_RATE};
use crate::stt::{ExclusiveRunner, Transcriber};

/// [`Transcriber`] that runs a ggml Whisper model loaded once at startup.
pub struct LocalWhisperTranscriber {
    context: Arc<WhisperContext>,
    // One inference at a time; concurrent webhooks queue here.
    runner: ExclusiveRunner,
    threads: i32,
}

impl LocalWhisperTranscriber {
    pub fn load(model_path: &str, threads: Option<u32>) -> anyhow::Result<Self> {
        let context = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|err| anyhow::anyhow!("failed to load Whisper model {model_path}: {err}"))?;
        let threads = threads
            .map(|t| t as i32)
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |n| n.get() as i32));
        info!(model_path, threads, "Whisper model loaded");
        Ok(Self {
            context: Arc::new(context),
            runner: ExclusiveRunner::default(),
            threads,
        })
    }
}

fn read_samples(path: &Path) -> Result<Vec<f32>, PipelineError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|err| PipelineError::TranscriptionFailed(format!("unreadable WAV: {err}")))?;
    let spec = reader.spec();
    if spec.sample_rate != TARGET_SAMPLE_RATE || spec.channels != 1 || spec.bits_per_sample != 16 {
        return Err(PipelineError::TranscriptionFailed(format!(
            "expected 16 kHz mono 16-bit audio, got {} Hz, {} channel(s), {} bits",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        )));
    }
    reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| PipelineError::TranscriptionFailed(format!("corrupt WAV samples: {err}")))
}

#[async_trait]
impl Transcriber for LocalWhisperTranscriber {
    fn name(&self) -> &str {
        "local"
    }

    async fn transcribe(
        &self,
        audio: &AudioAsset,
        language: &str,
    ) -> Result<TranscriptionResult, PipelineError> {
        let samples = read_samples(&audio.wav_path)?;
        let context = self.context.clone();
        let threads = self.threads;
        let language = language.to_string();

        let text = self.runner.run(move || -> Result<String, PipelineError> {
            let mut state = context.create_state().map_err(|err| {
                PipelineError::TranscriptionFailed(format!("failed to create state: {err}"))
            })?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_n_threads(threads);
            if !language.is_empty() {
                params.set_language(Some(language.as_str()));
            }
            params.set_translate(false);
            params.set_no_timestamps(true);
            params.set_print_realtime(false);
            params.set_print_progress(false);
            params.set_print_timestamps(false);

            state.full(params, &samples).map_err(|err| {
                PipelineError::TranscriptionFailed(format!("full decode failed: {err}"))
            })?;

            let mut text = String::new();
            for idx in 0..state.full_n_segments() {
                let Some(segment) = state.get_segment(idx) else {
                    continue;
                };
                let piece = segment
                    .to_str_lossy()
                    .map(|cow| cow.to_string())
                    .unwrap_or_default();
                text.push_str(&piece);
            }
            Ok(text.trim().to_string())
        })
        .await?;

        Ok(TranscriptionResult { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audio::pcm_to_wav;

    #[test]
    fn test_read_samples_scales_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, pcm_to_wav(&[0, 16384, -32768], 16000).unwrap()).unwrap();
        let samples = read_samples(&path).unwrap();
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_read_samples_rejects_unnormalized_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, pcm_to_wav(&[0; 10], 44100).unwrap()).unwrap();
        assert!(matches!(
            read_samples(&path),
            Err(PipelineError::TranscriptionFailed(_))
        ));
    }
}
