use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media attachment referenced by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub content_type: String,
    pub url: String,
}

impl MediaRef {
    /// True when the content type names an audio payload (`audio/ogg`, `audio/mpeg`, ...).
    pub fn is_audio(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("audio")
    }
}

/// Inbound message from the webhook, parsed once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel prefix of the `From` address (e.g. `whatsapp`).
    pub channel: String,
    /// Sender identifier with the channel prefix stripped.
    pub sender: String,
    pub body: String,
    pub num_media: u32,
    pub media: Vec<MediaRef>,
    pub message_sid: Option<String>,
    pub profile_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// The first attachment, if the message has one and it is audio.
    ///
    /// Only the first attachment is ever considered.
    pub fn first_audio(&self) -> Option<&MediaRef> {
        if self.num_media == 0 {
            return None;
        }
        self.media.first().filter(|m| m.is_audio())
    }
}

/// Text produced by the transcriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
}

/// Message sent back through the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    pub to: String,
    /// Provider-assigned identifier, set once the message is accepted.
    pub sid: Option<String>,
}

/// Delivery status notification for a previously sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: String,
    pub error_code: Option<String>,
    pub to: Option<String>,
}

impl StatusCallback {
    pub fn is_failure(&self) -> bool {
        matches!(self.message_status.as_str(), "failed" | "undelivered")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(num_media: u32, media: Vec<MediaRef>) -> InboundMessage {
        InboundMessage {
            channel: "whatsapp".into(),
            sender: "+15551234567".into(),
            body: String::new(),
            num_media,
            media,
            message_sid: None,
            profile_name: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_audio() {
        let ogg = MediaRef {
            content_type: "audio/ogg".into(),
            url: "https://example.com/m".into(),
        };
        assert!(ogg.is_audio());

        let upper = MediaRef {
            content_type: "Audio/OGG; codecs=opus".into(),
            url: String::new(),
        };
        assert!(upper.is_audio());

        let image = MediaRef {
            content_type: "image/jpeg".into(),
            url: String::new(),
        };
        assert!(!image.is_audio());
    }

    #[test]
    fn test_first_audio_only_considers_first_item() {
        let image = MediaRef {
            content_type: "image/png".into(),
            url: "https://example.com/1".into(),
        };
        let audio = MediaRef {
            content_type: "audio/ogg".into(),
            url: "https://example.com/2".into(),
        };
        let msg = message(2, vec![image, audio.clone()]);
        assert!(msg.first_audio().is_none());

        let msg = message(1, vec![audio.clone()]);
        assert_eq!(msg.first_audio(), Some(&audio));
    }

    #[test]
    fn test_first_audio_none_without_media() {
        let audio = MediaRef {
            content_type: "audio/ogg".into(),
            url: "https://example.com/2".into(),
        };
        assert!(message(0, vec![audio]).first_audio().is_none());
        assert!(message(0, vec![]).first_audio().is_none());
    }

    #[test]
    fn test_status_failure() {
        let mut status = StatusCallback {
            message_sid: "SM123".into(),
            message_status: "delivered".into(),
            error_code: None,
            to: None,
        };
        assert!(!status.is_failure());
        status.message_status = "undelivered".into();
        assert!(status.is_failure());
    }
}
