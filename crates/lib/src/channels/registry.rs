//! Channel handle trait and registry: register and look up channels by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{channel} is not configured: {detail}")]
    NotConfigured { channel: String, detail: String },
    #[error("{channel} request failed: {source}")]
    Request {
        channel: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{channel} api error: {detail}")]
    Api { channel: String, detail: String },
}

impl ChannelError {
    pub fn request(channel: &str, source: reqwest::Error) -> Self {
        ChannelError::Request {
            channel: channel.to_string(),
            source,
        }
    }

    pub fn api(channel: &str, detail: impl Into<String>) -> Self {
        ChannelError::Api {
            channel: channel.to_string(),
            detail: detail.into(),
        }
    }

    pub fn not_configured(channel: &str, detail: impl Into<String>) -> Self {
        ChannelError::NotConfigured {
            channel: channel.to_string(),
            detail: detail.into(),
        }
    }
}

/// Handle to a running channel (stop, send message, presence).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation (e.g. Telegram chat_id, WhatsApp phone number).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
    /// Show a typing/presence indicator. Channels without one do nothing.
    async fn set_typing(&self, _conversation_id: &str) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Registry of channel ids to handles. Shared across gateway.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every registered channel.
    pub async fn stop_all(&self) {
        for handle in self.inner.read().await.values() {
            handle.stop();
        }
    }
}
