//! Gateway shared state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use scribe_core::config::Config;
use scribe_media::{MediaFetcher, Transcriber};
use scribe_twilio::{ReplyDispatcher, RequestValidator};

/// Shared gateway state, immutable after startup.
pub struct GatewayState {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub dispatcher: Arc<dyn ReplyDispatcher>,
    /// `None` when signature enforcement is switched off.
    pub validator: Option<RequestValidator>,
    pub language: String,
    pub scratch_root: Option<PathBuf>,
    pub transcribe_timeout: Duration,
    pub notify_on_failure: bool,
    pub public_url: Option<String>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Assemble the state from config and the three pipeline capabilities.
    ///
    /// Fails when signature enforcement is on but no auth token resolves.
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn MediaFetcher>,
        transcriber: Arc<dyn Transcriber>,
        dispatcher: Arc<dyn ReplyDispatcher>,
    ) -> anyhow::Result<Self> {
        let twilio = config.twilio();
        let validator = if twilio.validate_signatures {
            let token = twilio.resolve_auth_token().ok_or_else(|| {
                anyhow::anyhow!("Signature validation is enabled but no Twilio auth token is set")
            })?;
            Some(RequestValidator::new(token))
        } else {
            warn!("Webhook signature validation is DISABLED; use only for local development");
            None
        };

        let transcription = config.transcription();
        let server = config.server();
        let media = config.media();

        Ok(Self {
            fetcher,
            transcriber,
            dispatcher,
            validator,
            language: transcription.language,
            scratch_root: media.scratch_dir.map(PathBuf::from),
            transcribe_timeout: Duration::from_secs(transcription.timeout_secs),
            notify_on_failure: server.notify_sender_on_failure,
            public_url: twilio
                .public_url
                .map(|u| u.trim_end_matches('/').to_string()),
            #[cfg(feature = "metrics")]
            metrics: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use scribe_core::config::{MediaConfig, ServerConfig, TranscriptionConfig, TwilioConfig};
    use scribe_core::error::PipelineError;
    use scribe_core::types::{MediaRef, TranscriptionResult};
    use scribe_media::{AudioAsset, ScratchDir};

    struct Unused;

    #[async_trait]
    impl MediaFetcher for Unused {
        async fn fetch(&self, _: &MediaRef, _: &ScratchDir) -> Result<AudioAsset, PipelineError> {
            unreachable!()
        }
    }

    #[async_trait]
    impl Transcriber for Unused {
        fn name(&self) -> &str {
            "unused"
        }

        async fn transcribe(
            &self,
            _: &AudioAsset,
            _: &str,
        ) -> Result<TranscriptionResult, PipelineError> {
            unreachable!()
        }
    }

    #[async_trait]
    impl ReplyDispatcher for Unused {
        async fn send(&self, _: &str, _: &str) -> Result<String, PipelineError> {
            unreachable!()
        }
    }

    fn build(config: &Config) -> anyhow::Result<GatewayState> {
        GatewayState::new(config, Arc::new(Unused), Arc::new(Unused), Arc::new(Unused))
    }

    #[test]
    fn test_new_copies_settings_out_of_config() {
        let config = Config {
            twilio: Some(TwilioConfig {
                auth_token: Some("token".into()),
                public_url: Some("https://scribe.example.com/".into()),
                ..Default::default()
            }),
            server: Some(ServerConfig {
                notify_sender_on_failure: true,
                ..Default::default()
            }),
            media: Some(MediaConfig {
                scratch_dir: Some("/var/tmp/scribe".into()),
                ..Default::default()
            }),
            transcription: Some(TranscriptionConfig {
                language: "en".into(),
                timeout_secs: 42,
                ..Default::default()
            }),
            ..Default::default()
        };

        let state = build(&config).unwrap();
        assert!(state.validator.is_some());
        assert_eq!(state.language, "en");
        assert_eq!(state.transcribe_timeout, Duration::from_secs(42));
        assert!(state.notify_on_failure);
        assert_eq!(state.scratch_root, Some(PathBuf::from("/var/tmp/scribe")));
        assert_eq!(state.public_url.as_deref(), Some("https://scribe.example.com"));
    }

    #[test]
    fn test_enforced_signatures_require_a_token() {
        let config = Config {
            twilio: Some(TwilioConfig {
                auth_token: None,
                auth_token_env: Some("WA_SCRIBE_TEST_TOKEN_NEVER_SET".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(build(&config).is_err());

        let disabled = Config {
            twilio: Some(TwilioConfig {
                validate_signatures: false,
                ..config.twilio()
            }),
            ..Default::default()
        };
        assert!(build(&disabled).unwrap().validator.is_none());
    }
}
