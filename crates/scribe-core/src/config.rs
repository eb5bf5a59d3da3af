//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScribeError};

/// Top-level wa-scribe configuration.
///
/// Every section is optional; missing sections fall back to their defaults,
/// which read credentials from the conventional `TWILIO_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio: Option<TwilioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Twilio account and webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: Option<String>,

    /// Sender number without the `whatsapp:` prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_number: Option<String>,
    #[serde(default = "default_whatsapp_number_env")]
    pub whatsapp_number_env: Option<String>,

    #[serde(default = "default_twilio_api_base")]
    pub api_base_url: String,

    /// Reject webhook calls whose `X-Twilio-Signature` does not verify.
    #[serde(default = "default_true")]
    pub validate_signatures: bool,

    /// Public base URL Twilio calls (e.g. a tunnel), used to rebuild the signed URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// URL Twilio should post delivery updates to for outgoing replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_callback_url: Option<String>,
}

fn default_account_sid_env() -> Option<String> {
    Some("TWILIO_ACCOUNT_SID".into())
}

fn default_auth_token_env() -> Option<String> {
    Some("TWILIO_AUTH_TOKEN".into())
}

fn default_whatsapp_number_env() -> Option<String> {
    Some("TWILIO_WHATSAPP_NUMBER".into())
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".into()
}

fn default_true() -> bool {
    true
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            account_sid_env: default_account_sid_env(),
            auth_token: None,
            auth_token_env: default_auth_token_env(),
            whatsapp_number: None,
            whatsapp_number_env: default_whatsapp_number_env(),
            api_base_url: default_twilio_api_base(),
            validate_signatures: true,
            public_url: None,
            status_callback_url: None,
        }
    }
}

/// Resolved Twilio credentials. All three are required to serve.
#[derive(Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub whatsapp_number: String,
}

impl std::fmt::Debug for TwilioCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioCredentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .field("whatsapp_number", &self.whatsapp_number)
            .finish()
    }
}

impl TwilioConfig {
    pub fn resolve_account_sid(&self) -> Option<String> {
        resolve_secret_field(&self.account_sid, &self.account_sid_env)
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }

    pub fn resolve_whatsapp_number(&self) -> Option<String> {
        resolve_secret_field(&self.whatsapp_number, &self.whatsapp_number_env)
            .map(|n| n.strip_prefix("whatsapp:").unwrap_or(n.as_str()).to_string())
    }

    /// Resolve all credentials, failing with the name of the first missing one.
    pub fn credentials(&self) -> Result<TwilioCredentials> {
        let missing = |env: &Option<String>, field: &str| {
            ScribeError::Config(match env {
                Some(var) => format!("Missing required environment variable: {var}"),
                None => format!("Missing required setting: twilio.{field}"),
            })
        };

        let account_sid = self
            .resolve_account_sid()
            .ok_or_else(|| missing(&self.account_sid_env, "account_sid"))?;
        let auth_token = self
            .resolve_auth_token()
            .ok_or_else(|| missing(&self.auth_token_env, "auth_token"))?;
        let whatsapp_number = self
            .resolve_whatsapp_number()
            .ok_or_else(|| missing(&self.whatsapp_number_env, "whatsapp_number"))?;

        Ok(TwilioCredentials {
            account_sid,
            auth_token,
            whatsapp_number,
        })
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Send the sender a short notice when their voice note could not be transcribed.
    #[serde(default)]
    pub notify_sender_on_failure: bool,
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            notify_sender_on_failure: false,
        }
    }
}

/// Media download and normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Largest accepted attachment in bytes (default: 16 MiB, WhatsApp's limit).
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,

    /// Parent directory for per-request scratch directories (default: system temp dir).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

fn default_download_timeout() -> u64 {
    30
}

fn default_max_download_bytes() -> u64 {
    16 * 1024 * 1024
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}

fn default_transcode_timeout() -> u64 {
    60
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            download_timeout_secs: default_download_timeout(),
            max_download_bytes: default_max_download_bytes(),
            ffmpeg_path: default_ffmpeg_path(),
            transcode_timeout_secs: default_transcode_timeout(),
            scratch_dir: None,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "groq", "openai" or "local" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Override for the OpenAI-compatible API base (e.g. a self-hosted server).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// ISO 639-1 language of the voice notes (default: "he").
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_transcription_timeout")]
    pub timeout_secs: u64,

    /// Path to a ggml Whisper model for the "local" provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
}

fn default_transcription_provider() -> String {
    "groq".into()
}

fn default_language() -> String {
    "he".into()
}

fn default_transcription_timeout() -> u64 {
    300
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: None,
            model: None,
            base_url: None,
            language: default_language(),
            timeout_secs: default_transcription_timeout(),
            model_path: None,
            threads: None,
        }
    }
}

impl TranscriptionConfig {
    /// Resolve the API key, falling back to the provider's conventional env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env).or_else(|| {
            let env_var = match self.provider.as_str() {
                "openai" => "OPENAI_API_KEY",
                "groq" => "GROQ_API_KEY",
                _ => return None,
            };
            std::env::var(env_var).ok().filter(|v| !v.is_empty())
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "scribe_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted).map_err(|e| ScribeError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn twilio(&self) -> TwilioConfig {
        self.twilio.clone().unwrap_or_default()
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn media(&self) -> MediaConfig {
        self.media.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_else(|| LoggingConfig {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        })
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or_else(default_port)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let twilio = self.twilio();
        if let Err(e) = twilio.credentials() {
            errors.push(e.to_string());
        }
        if !twilio.validate_signatures {
            warnings.push(
                "Webhook signature validation is disabled; any caller can trigger transcriptions"
                    .to_string(),
            );
        }
        if let Some(url) = &twilio.public_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!("twilio.public_url must be an http(s) URL: {url}"));
            }
        }

        if self.port() == 0 {
            errors.push("Server port cannot be 0".to_string());
        }

        let stt = self.transcription();
        match stt.provider.as_str() {
            "groq" | "openai" => {
                if stt.resolve_api_key().is_none() {
                    errors.push(format!(
                        "Transcription provider '{}' has no API key configured",
                        stt.provider
                    ));
                }
            }
            "local" => match &stt.model_path {
                Some(path) if !Path::new(path).exists() => {
                    errors.push(format!("Whisper model file not found: {path}"));
                }
                None => errors.push(
                    "Transcription provider 'local' requires transcription.model_path".to_string(),
                ),
                _ => {}
            },
            other => errors.push(format!("Unknown transcription provider '{other}'")),
        }
        if stt.language.is_empty() {
            warnings.push("transcription.language is empty; the model will auto-detect".into());
        }

        (warnings, errors)
    }
}

/// Base directory for wa-scribe data: `~/.wa_scribe/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wa_scribe")
}
