//! Sapa core library: message routing with a greeting check and an intent -> primary ->
//! secondary fallback chain, per-sender admission, conversation transcript, channels and
//! the gateway that hosts them.

pub mod backends;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod gateway;
pub mod greeting;
pub mod init;
pub mod retry;
pub mod router;
pub mod transcript;
