//! Communication channels (Telegram, WhatsApp Cloud).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors
//! and route messages. Inbound messages are sent to the gateway for routing; replies go
//! back through the channel that received them.

mod inbound;
mod registry;
mod telegram;
mod whatsapp;

pub use inbound::{InboundMessage, SenderId};
pub use registry::{ChannelError, ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
pub use whatsapp::{verify_signature, verify_subscription, WhatsAppChannel, WhatsAppWebhook};
