//! Twilio WhatsApp channel.
//!
//! Everything provider-specific lives here: decoding webhook form fields,
//! verifying `X-Twilio-Signature`, and sending replies through the Messages API.
//! The gateway only sees [`ReplyDispatcher`] and [`RequestValidator`].

pub mod inbound;
pub mod messaging;
pub mod signature;

pub use messaging::{ReplyDispatcher, TwilioMessenger};
pub use signature::RequestValidator;

/// Channel prefix used on Twilio addresses for WhatsApp.
pub const WHATSAPP_CHANNEL: &str = "whatsapp";

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Prefix a bare identifier with the WhatsApp channel (`whatsapp:+1555...`).
pub fn channel_address(identifier: &str) -> String {
    format!("{WHATSAPP_CHANNEL}:{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_address() {
        assert_eq!(channel_address("+14155238886"), "whatsapp:+14155238886");
    }
}
