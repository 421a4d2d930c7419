//! WhatsApp Cloud API channel: webhook verification and parsing, text replies via
//! `/{phone_number_id}/messages`.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::{ChannelError, ChannelHandle};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

const CHANNEL_ID: &str = "whatsapp";

type HmacSha256 = Hmac<Sha256>;

/// Outbound side of the WhatsApp Cloud API. Inbound arrives through the gateway webhook.
pub struct WhatsAppChannel {
    api_base: String,
    phone_number_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(api_base: &str, phone_number_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelHandle for WhatsAppChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    // Webhook driven; nothing to stop.
    fn stop(&self) {}

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": conversation_id,
            "type": "text",
            "text": { "preview_url": false, "body": text },
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::request(CHANNEL_ID, e))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ChannelError::api(
                CHANNEL_ID,
                format!("send failed: {} {}", status, body),
            ));
        }
        Ok(())
    }
}

/// Webhook notification body (`object: whatsapp_business_account`).
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhook {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    pub value: WebhookValue,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub metadata: Option<WebhookMetadata>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMetadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

impl WhatsAppWebhook {
    /// Text messages addressed to `phone_number_id`. Status updates, media and other
    /// numbers are skipped.
    pub fn into_inbound(self, phone_number_id: &str) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        for change in self.entry.into_iter().flat_map(|e| e.changes) {
            if change.field != "messages" {
                log::debug!("whatsapp: ignoring {} webhook", change.field);
                continue;
            }
            if let Some(ref meta) = change.value.metadata {
                if meta.phone_number_id != phone_number_id {
                    log::warn!(
                        "whatsapp: webhook for phone number {} (expected {})",
                        meta.phone_number_id,
                        phone_number_id
                    );
                    continue;
                }
            }
            for msg in change.value.messages {
                if msg.message_type != "text" {
                    log::debug!("whatsapp: ignoring {} message", msg.message_type);
                    continue;
                }
                let Some(text) = msg.text.map(|t| t.body).filter(|b| !b.trim().is_empty()) else {
                    continue;
                };
                out.push(InboundMessage::new(CHANNEL_ID, msg.from, text));
            }
        }
        out
    }
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` against the raw body.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        log::warn!("whatsapp: signature header missing sha256= prefix");
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Subscription handshake: echo `hub.challenge` when mode is subscribe and the token matches.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    verify_token: &str,
) -> Option<String> {
    if mode? == "subscribe" && !verify_token.is_empty() && token? == verify_token {
        challenge.map(str::to_string)
    } else {
        None
    }
}
