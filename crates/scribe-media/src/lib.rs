//! Media pipeline: authenticated download, normalization to WAV, speech-to-text.

pub mod audio;
pub mod fetch;
#[cfg(feature = "local-whisper")]
pub mod local;
pub mod stt;

pub use audio::{AudioAsset, AudioNormalizer, FfmpegNormalizer, ScratchDir};
pub use fetch::{BasicCredentials, HttpMediaFetcher, MediaFetcher};
pub use stt::{ExclusiveRunner, Transcriber, build_transcriber};
