mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use scribe_core::config::Config;
use scribe_gateway::{GatewayState, start_server};
use scribe_media::audio::AudioAsset;
use scribe_media::{
    AudioNormalizer, BasicCredentials, FfmpegNormalizer, HttpMediaFetcher, ScratchDir,
    build_transcriber,
};
use scribe_twilio::TwilioMessenger;
use scribe_twilio::inbound::FormParams;
use scribe_twilio::signature::compute_signature;

#[derive(Parser)]
#[command(
    name = "wa-scribe",
    about = "Transcribes WhatsApp voice notes and replies to the sender with the text",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Transcribe a local audio file with the configured backend
    Transcribe {
        file: PathBuf,

        /// Language hint (default: transcription.language)
        #[arg(long)]
        language: Option<String>,
    },

    /// Print the X-Twilio-Signature for a webhook request
    Sign {
        /// Full URL Twilio posts to
        #[arg(long)]
        url: String,

        /// Form parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Auth token (default: configured Twilio auth token)
        #[arg(long)]
        token: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (secrets redacted)
    Show,
    /// Check configuration and credentials
    Validate,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&config.logging(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port, bind } => serve(config, port, bind).await?,
        Commands::Transcribe { file, language } => transcribe(&config, &file, language).await?,
        Commands::Sign { url, params, token } => {
            let token = token
                .or_else(|| config.twilio().resolve_auth_token())
                .context("No Twilio auth token configured (set TWILIO_AUTH_TOKEN or pass --token)")?;
            let params: FormParams = params.into_iter().collect();
            println!("{}", compute_signature(&url, &params, &token));
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&redacted(config))?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                println!("Config: {}", config_path.display());
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>, bind: Option<String>) -> anyhow::Result<()> {
    let twilio = config.twilio();
    let credentials = twilio.credentials()?;

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration: {}", errors.join("; "));
    }

    let media = config.media();
    let normalizer = Arc::new(FfmpegNormalizer::new(
        &media.ffmpeg_path,
        Duration::from_secs(media.transcode_timeout_secs),
    ));
    let fetcher = Arc::new(HttpMediaFetcher::new(
        Some(BasicCredentials {
            username: credentials.account_sid.clone(),
            password: credentials.auth_token.clone(),
        }),
        normalizer,
        Duration::from_secs(media.download_timeout_secs),
        media.max_download_bytes,
    )?);
    let transcriber = build_transcriber(&config.transcription())?;
    let dispatcher = Arc::new(TwilioMessenger::new(
        credentials,
        twilio.api_base_url.clone(),
        twilio.status_callback_url.clone(),
    )?);

    let server = config.server();
    let port = port.unwrap_or(server.port);
    let bind = bind
        .or(server.bind)
        .unwrap_or_else(|| "0.0.0.0".to_string());

    #[allow(unused_mut)]
    let mut state = GatewayState::new(&config, fetcher, transcriber, dispatcher)?;
    #[cfg(feature = "metrics")]
    {
        state.metrics = Some(scribe_gateway::metrics::install_prometheus_recorder()?);
    }

    tracing::info!("Starting wa-scribe v{} on {bind}:{port}", env!("CARGO_PKG_VERSION"));
    start_server(Arc::new(state), &bind, port).await
}

async fn transcribe(config: &Config, file: &Path, language: Option<String>) -> anyhow::Result<()> {
    let encoded_bytes = std::fs::metadata(file)
        .with_context(|| format!("Cannot read {}", file.display()))?
        .len();

    let media = config.media();
    let scratch = ScratchDir::create(media.scratch_dir.as_deref().map(Path::new), "cli")?;
    let normalizer = FfmpegNormalizer::new(
        &media.ffmpeg_path,
        Duration::from_secs(media.transcode_timeout_secs),
    );
    let wav_path = scratch.file("normalized.wav");
    let summary = normalizer.normalize(file, &wav_path).await?;

    let settings = config.transcription();
    let language = language.unwrap_or_else(|| settings.language.clone());
    let transcriber = build_transcriber(&settings)?;

    let asset = AudioAsset {
        content_type: file
            .extension()
            .map(|ext| format!("audio/{}", ext.to_string_lossy()))
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        encoded_path: file.to_path_buf(),
        encoded_bytes,
        wav_path,
        duration_secs: summary.duration_secs,
    };
    let result = transcriber.transcribe(&asset, &language).await?;
    scratch.close()?;

    println!("{}", result.text);
    Ok(())
}

/// Copy of the config with direct secret values masked.
fn redacted(mut config: Config) -> Config {
    const MASK: &str = "[redacted]";
    if let Some(twilio) = config.twilio.as_mut() {
        if twilio.auth_token.is_some() {
            twilio.auth_token = Some(MASK.into());
        }
    }
    if let Some(stt) = config.transcription.as_mut() {
        if stt.api_key.is_some() {
            stt.api_key = Some(MASK.into());
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    use scribe_core::config::{TranscriptionConfig, TwilioConfig};

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("Body=a=b").unwrap(),
            ("Body".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_redacted_masks_direct_secrets() {
        let config = Config {
            twilio: Some(TwilioConfig {
                account_sid: Some("AC1".into()),
                auth_token: Some("hunter2".into()),
                ..Default::default()
            }),
            transcription: Some(TranscriptionConfig {
                api_key: Some("sk-live".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let json = serde_json::to_string(&redacted(config)).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("sk-live"));
        assert!(json.contains("AC1"));
    }

    #[test]
    fn test_cli_parses_sign_params() {
        let cli = Cli::try_parse_from([
            "wa-scribe",
            "sign",
            "--url",
            "https://example.com/webhook",
            "--param",
            "From=whatsapp:+1555",
            "--param",
            "NumMedia=0",
        ])
        .unwrap();
        match cli.command {
            Commands::Sign { params, .. } => assert_eq!(params.len(), 2),
            _ => panic!("expected sign"),
        }
    }
}
