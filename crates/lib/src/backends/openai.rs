//! OpenAI-compatible chat completions client, used as the primary generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BackendError, TextGenerator};
use crate::config::{resolve_secret, GeneratorConfig};

const NAME: &str = "openai";

/// Client for POST {base_url}/chat/completions with a single user message.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    /// Env OPENAI_API_KEY / OPENAI_MODEL / OPENAI_TEMPERATURE / OPENAI_MAX_TOKENS override config.
    pub fn from_config(config: &GeneratorConfig) -> Self {
        let model = resolve_secret("OPENAI_MODEL", &config.model)
            .unwrap_or_else(|| "gpt-3.5-turbo".to_string());
        let temperature = std::env::var("OPENAI_TEMPERATURE")
            .ok()
            .and_then(|s| s.trim().parse::<f32>().ok())
            .or(config.temperature)
            .unwrap_or(0.7);
        let max_tokens = std::env::var("OPENAI_MAX_TOKENS")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .or(config.max_tokens)
            .unwrap_or(150);
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        Self::new(
            base_url,
            resolve_secret("OPENAI_API_KEY", &config.api_key),
            model,
            temperature,
            max_tokens,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(res: ChatResponse) -> Option<String> {
    res.choices
        .into_iter()
        .next()?
        .message?
        .content
        .filter(|c| !c.trim().is_empty())
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn name(&self) -> &str {
        NAME
    }

    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::not_configured(NAME, "api key not set"))?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let res = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(NAME, e))?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::status(NAME, status, body));
        }
        let data: ChatResponse = res
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(NAME, e))?;
        first_content(data).ok_or_else(|| BackendError::malformed(NAME, "no message content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: vec![ChatMessage {
                role: "user",
                content: "What is the capital of Indonesia?",
            }],
            temperature: 0.7,
            max_tokens: 150,
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["model"], "gpt-3.5-turbo");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["max_tokens"], 150);
    }

    #[test]
    fn extracts_first_choice() {
        let raw = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Jakarta is the capital."}}]}"#;
        let res: ChatResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(first_content(res).as_deref(), Some("Jakarta is the capital."));
    }

    #[test]
    fn empty_choices_yield_nothing() {
        let res: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("parse");
        assert_eq!(first_content(res), None);
        let res: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).expect("parse");
        assert_eq!(first_content(res), None);
    }

    #[tokio::test]
    async fn missing_key_is_permanent() {
        let c = OpenAiClient::new("http://127.0.0.1:9", None, "m", 0.7, 10);
        let err = c.generate("hi").await.expect_err("no key");
        assert!(!err.is_retryable());
    }
}
