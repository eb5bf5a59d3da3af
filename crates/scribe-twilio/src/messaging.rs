//! Reply dispatch through the Twilio Messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use scribe_core::config::TwilioCredentials;
use scribe_core::error::PipelineError;
use scribe_core::types::OutboundMessage;

use crate::channel_address;

/// Twilio rejects message bodies longer than this many characters.
pub const MAX_BODY_CHARS: usize = 1600;

/// Sends a text message to a channel identifier. No retries.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    /// Send `body` to `to` (bare identifier, no channel prefix) and return the
    /// provider-assigned message id.
    async fn send(&self, body: &str, to: &str) -> Result<String, PipelineError>;
}

/// [`ReplyDispatcher`] backed by `POST /2010-04-01/Accounts/{sid}/Messages.json`.
pub struct TwilioMessenger {
    client: reqwest::Client,
    api_base: String,
    credentials: TwilioCredentials,
    status_callback: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl TwilioMessenger {
    pub fn new(
        credentials: TwilioCredentials,
        api_base: impl Into<String>,
        status_callback: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            credentials,
            status_callback,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.credentials.account_sid
        )
    }

    async fn post_message(
        &self,
        mut message: OutboundMessage,
    ) -> Result<OutboundMessage, PipelineError> {
        let from = channel_address(&self.credentials.whatsapp_number);
        let to = channel_address(&message.to);

        let mut form = vec![
            ("From", from.as_str()),
            ("To", to.as_str()),
            ("Body", message.body.as_str()),
        ];
        if let Some(callback) = &self.status_callback {
            form.push(("StatusCallback", callback.as_str()));
        }

        let resp = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.credentials.account_sid,
                Some(&self.credentials.auth_token),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| PipelineError::SendFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ApiError>(&body) {
                Ok(ApiError {
                    code,
                    message: Some(msg),
                }) => match code {
                    Some(code) => format!("Twilio API error {status}: {msg} (code {code})"),
                    None => format!("Twilio API error {status}: {msg}"),
                },
                _ => format!("Twilio API error {status}"),
            };
            error!(%status, to = %message.to, body = %body, "Twilio send failed");
            return Err(PipelineError::SendFailed(detail));
        }

        let resource: MessageResource = resp
            .json()
            .await
            .map_err(|e| PipelineError::SendFailed(format!("unreadable Twilio response: {e}")))?;
        info!(
            sid = %resource.sid,
            status = resource.status.as_deref().unwrap_or("unknown"),
            to = %message.to,
            "Message queued"
        );
        message.sid = Some(resource.sid);
        Ok(message)
    }
}

#[async_trait]
impl ReplyDispatcher for TwilioMessenger {
    /// Bodies over the per-message limit go out as several messages in order.
    /// Parts already accepted are not recalled when a later part fails, so a
    /// redelivered webhook repeats them.
    async fn send(&self, body: &str, to: &str) -> Result<String, PipelineError> {
        let chunks = split_body(body, MAX_BODY_CHARS);
        let total = chunks.len();
        let mut first_sid = None;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let message = OutboundMessage {
                body: chunk,
                to: to.to_string(),
                sid: None,
            };
            let sent = match self.post_message(message).await {
                Ok(sent) => sent,
                Err(PipelineError::SendFailed(detail)) if index > 0 => {
                    warn!(to, delivered = index, total, "Reply partially delivered");
                    return Err(PipelineError::SendFailed(format!(
                        "{detail} (after {index} of {total} parts were delivered)"
                    )));
                }
                Err(err) => return Err(err),
            };
            if first_sid.is_none() {
                first_sid = sent.sid;
            }
        }
        first_sid.ok_or_else(|| PipelineError::SendFailed("empty message body".into()))
    }
}

/// Split `body` into chunks of at most `max_chars` characters, preferring to
/// break after whitespace. Never splits inside a character.
pub fn split_body(body: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = body.trim();

    while !rest.is_empty() {
        if rest.chars().count() <= max_chars {
            chunks.push(rest.to_string());
            break;
        }
        // Byte offset just past the `max_chars`-th character.
        let hard_limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let cut = rest[..hard_limit]
            .rfind(char::is_whitespace)
            .filter(|&idx| idx > 0)
            .unwrap_or(hard_limit);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }

    chunks
}
