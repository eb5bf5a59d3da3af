//! Per-request scratch space, audio assets, and normalization to 16 kHz mono WAV.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, warn};

use scribe_core::error::PipelineError;

/// Sample rate Whisper models expect.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Temporary directory owned by one request.
///
/// The directory name embeds the request id plus a random suffix, so concurrent
/// requests never share paths. It is removed by [`ScratchDir::close`] or, on any
/// other exit path, when dropped.
pub struct ScratchDir {
    dir: TempDir,
    request_id: String,
}

impl ScratchDir {
    /// Create a scratch directory under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>, request_id: &str) -> io::Result<Self> {
        let safe_id: String = request_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .take(64)
            .collect();
        let prefix = format!("wa-scribe-{safe_id}-");

        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        debug!(request_id, path = %dir.path().display(), "Scratch directory created");
        Ok(Self {
            dir,
            request_id: request_id.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Path of a file inside the scratch directory. `name` must be a fixed name
    /// chosen by the caller, never request data.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Delete the directory and everything in it, reporting failures.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(request_id = %self.request_id, path = %path.display(), "Scratch directory removed");
        Ok(())
    }
}

/// Downloaded audio plus its normalized WAV, both inside a [`ScratchDir`].
#[derive(Debug, Clone)]
pub struct AudioAsset {
    pub content_type: String,
    pub encoded_path: PathBuf,
    pub encoded_bytes: u64,
    pub wav_path: PathBuf,
    pub duration_secs: f32,
}

impl AudioAsset {
    pub async fn wav_bytes(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.wav_path).await
    }
}

/// File extension for a downloaded attachment, chosen from a fixed list.
pub fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "audio/ogg" | "audio/opus" | "application/ogg" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/amr" => "amr",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        _ => "bin",
    }
}

/// Header facts about a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavSummary {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub duration_secs: f32,
}

impl WavSummary {
    /// True for 16 kHz mono 16-bit PCM, the form the transcribers consume.
    pub fn is_normalized(&self) -> bool {
        self.sample_rate == TARGET_SAMPLE_RATE && self.channels == 1 && self.bits_per_sample == 16
    }
}

/// Read the header of a WAV file.
pub fn inspect_wav(path: &Path) -> Result<WavSummary, hound::Error> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(WavSummary {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        duration_secs: reader.duration() as f32 / spec.sample_rate.max(1) as f32,
    })
}

/// Encode mono 16-bit PCM samples as a WAV file in memory.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in pcm {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Converts a downloaded audio file into a normalized WAV.
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<WavSummary, PipelineError>;
}

/// [`AudioNormalizer`] that shells out to ffmpeg.
///
/// Input that is already a normalized WAV is copied without spawning ffmpeg.
pub struct FfmpegNormalizer {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegNormalizer {
    pub fn new(ffmpeg: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le", "-f", "wav"])
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                PipelineError::DecodeFailed(format!(
                    "ffmpeg timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                PipelineError::DecodeFailed(format!(
                    "failed to run {}: {e}",
                    self.ffmpeg.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            warn!(status = %result.status, stderr = %stderr.trim(), "ffmpeg failed");
            return Err(PipelineError::DecodeFailed(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                last_line.unwrap_or("no diagnostics")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<WavSummary, PipelineError> {
        if let Ok(summary) = inspect_wav(input) {
            if summary.is_normalized() {
                tokio::fs::copy(input, output)
                    .await
                    .map_err(|e| PipelineError::DecodeFailed(format!("copy failed: {e}")))?;
                debug!(input = %input.display(), "Input already normalized, copied");
                return Ok(summary);
            }
        }

        self.transcode(input, output).await?;

        let summary = inspect_wav(output).map_err(|e| {
            PipelineError::DecodeFailed(format!("normalized output is not a readable WAV: {e}"))
        })?;
        debug!(
            input = %input.display(),
            sample_rate = summary.sample_rate,
            duration_secs = summary.duration_secs,
            "Audio normalized"
        );
        Ok(summary)
    }
}
