//! Inbound message from a channel: delivered to the gateway for routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a conversation partner (e.g. a Telegram chat id or a
/// WhatsApp phone number). Key for dispatch admission and the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SenderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SenderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A text message from a channel, consumed once by the router.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel that received the message; replies go back through it.
    pub channel_id: String,
    pub sender: SenderId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(channel_id: impl Into<String>, sender: impl Into<SenderId>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender: sender.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}
