//! Webhook gateway: receives WhatsApp messages, transcribes voice notes and
//! replies to the sender with the text.

#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod webhook;

pub use server::{build_router, serve, start_server};
pub use state::GatewayState;
