//! Telegram channel: long-poll getUpdates (or webhook) and sendMessage via Bot API.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::{ChannelError, ChannelHandle};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_ID: &str = "telegram";
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

impl TelegramUpdate {
    /// Text messages become inbound messages keyed by chat id; everything else is ignored.
    pub fn into_inbound(self) -> Option<InboundMessage> {
        let msg = self.message?;
        let text = msg.text.filter(|t| !t.trim().is_empty())?;
        Some(InboundMessage::new(CHANNEL_ID, msg.chat.id.to_string(), text))
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    token: Option<String>,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            api_base: TELEGRAM_API_BASE.to_string(),
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ChannelError::not_configured(CHANNEL_ID, "bot token not configured"))?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    /// POST a Bot API method and check both HTTP status and the `ok` flag.
    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let url = self.method_url(method)?;
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::request(CHANNEL_ID, e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api(
                CHANNEL_ID,
                format!("{} failed: {} {}", method, status, body),
            ));
        }
        let data: ApiResponse<serde_json::Value> = res
            .json()
            .await
            .map_err(|e| ChannelError::request(CHANNEL_ID, e))?;
        if !data.ok {
            return Err(ChannelError::api(
                CHANNEL_ID,
                format!(
                    "{} returned ok: false ({})",
                    method,
                    data.description.unwrap_or_default()
                ),
            ));
        }
        Ok(())
    }

    /// Start the getUpdates long-poll loop and forward messages to the gateway. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), ChannelError> {
        let url = format!(
            "{}?timeout={}",
            self.method_url("getUpdates")?,
            LONG_POLL_TIMEOUT
        );
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChannelError::request(CHANNEL_ID, e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api(
                CHANNEL_ID,
                format!("getUpdates failed: {} {}", status, body),
            ));
        }
        let data: ApiResponse<Vec<TelegramUpdate>> = res
            .json()
            .await
            .map_err(|e| ChannelError::request(CHANNEL_ID, e))?;
        if !data.ok {
            return Err(ChannelError::api(CHANNEL_ID, "getUpdates returned ok: false"));
        }
        let updates = data.result.unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.call("setWebhook", body).await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call("deleteWebhook", serde_json::json!({})).await
    }
}

async fn run_get_updates_loop(
    channel: Arc<TelegramChannel>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next.or(offset);
                for inbound in updates.into_iter().filter_map(TelegramUpdate::into_inbound) {
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        self.call(
            "sendMessage",
            serde_json::json!({ "chat_id": conversation_id, "text": text }),
        )
        .await
    }

    async fn set_typing(&self, conversation_id: &str) -> Result<(), ChannelError> {
        self.call(
            "sendChatAction",
            serde_json::json!({ "chat_id": conversation_id, "action": "typing" }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_update_becomes_inbound() {
        let raw = r#"{"update_id": 10, "message": {"message_id": 1, "chat": {"id": 4242, "type": "private"}, "text": "jam buka toko?"}}"#;
        let update: TelegramUpdate = serde_json::from_str(raw).expect("parse");
        let inbound = update.into_inbound().expect("inbound");
        assert_eq!(inbound.channel_id, "telegram");
        assert_eq!(inbound.sender.as_str(), "4242");
        assert_eq!(inbound.text, "jam buka toko?");
    }

    #[test]
    fn non_text_updates_are_ignored() {
        let sticker = r#"{"update_id": 11, "message": {"chat": {"id": 1}}}"#;
        let update: TelegramUpdate = serde_json::from_str(sticker).expect("parse");
        assert!(update.into_inbound().is_none());
        let edited = r#"{"update_id": 12, "edited_message": {"chat": {"id": 1}, "text": "x"}}"#;
        let update: TelegramUpdate = serde_json::from_str(edited).expect("parse");
        assert!(update.into_inbound().is_none());
    }

    #[tokio::test]
    async fn send_without_token_is_not_configured() {
        let ch = TelegramChannel::new(None);
        let err = ch.send_message("1", "hi").await.expect_err("no token");
        assert!(matches!(err, ChannelError::NotConfigured { .. }));
    }
}
