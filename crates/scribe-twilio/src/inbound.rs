//! Decoding of Twilio webhook form fields.

use std::collections::BTreeMap;

use scribe_core::error::PipelineError;
use scribe_core::types::{InboundMessage, MediaRef, StatusCallback};

/// Twilio attaches at most ten media items to one message.
const MAX_MEDIA: u32 = 10;

/// Decoded `application/x-www-form-urlencoded` webhook body, sorted by key.
pub type FormParams = BTreeMap<String, String>;

fn field<'a>(params: &'a FormParams, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

/// Parse an incoming-message webhook into an [`InboundMessage`].
///
/// `From` must be a `channel:identifier` address. `NumMedia` defaults to zero
/// when absent.
pub fn parse_inbound(params: &FormParams) -> Result<InboundMessage, PipelineError> {
    let from = field(params, "From")
        .filter(|f| !f.is_empty())
        .ok_or_else(|| PipelineError::MalformedRequest("missing From field".into()))?;

    let (channel, sender) = from.split_once(':').ok_or_else(|| {
        PipelineError::MalformedRequest(format!("From field has no channel prefix: {from}"))
    })?;
    if sender.is_empty() {
        return Err(PipelineError::MalformedRequest(format!(
            "From field has an empty identifier: {from}"
        )));
    }

    let num_media = match field(params, "NumMedia").map(str::trim) {
        None | Some("") => 0,
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            PipelineError::MalformedRequest(format!("NumMedia is not a non-negative integer: {raw}"))
        })?,
    };

    let media = (0..num_media.min(MAX_MEDIA))
        .map(|i| MediaRef {
            content_type: field(params, &format!("MediaContentType{i}"))
                .unwrap_or_default()
                .to_string(),
            url: field(params, &format!("MediaUrl{i}"))
                .unwrap_or_default()
                .to_string(),
        })
        .collect();

    Ok(InboundMessage {
        channel: channel.to_string(),
        sender: sender.to_string(),
        body: field(params, "Body").unwrap_or_default().to_string(),
        num_media,
        media,
        message_sid: field(params, "MessageSid").map(str::to_string),
        profile_name: field(params, "ProfileName").map(str::to_string),
        received_at: chrono::Utc::now(),
    })
}

/// Parse a delivery status callback. Missing fields decode as empty strings.
pub fn parse_status(params: &FormParams) -> StatusCallback {
    StatusCallback {
        message_sid: field(params, "MessageSid").unwrap_or_default().to_string(),
        message_status: field(params, "MessageStatus").unwrap_or_default().to_string(),
        error_code: field(params, "ErrorCode")
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        to: field(params, "To").map(str::to_string),
    }
}
