//! Dialogflow ES intent detection over REST (`sessions.detectIntent`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BackendError, DetectedIntent, IntentBackend};
use crate::config::{resolve_secret, resolve_setting, IntentConfig};

const NAME: &str = "dialogflow";
const MAX_SESSION_ID_LEN: usize = 36;

/// Client for the Dialogflow ES v2 API.
#[derive(Clone)]
pub struct DialogflowClient {
    base_url: String,
    project_id: String,
    language_code: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl DialogflowClient {
    pub fn new(
        base_url: &str,
        project_id: impl Into<String>,
        language_code: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            language_code: language_code.into(),
            access_token,
            client: reqwest::Client::new(),
        }
    }

    /// None when no project id is configured.
    pub fn from_config(config: &IntentConfig) -> Option<Self> {
        let project_id = resolve_secret("DIALOGFLOW_PROJECT_ID", &config.project_id)?;
        let language_code = resolve_setting("DIALOGFLOW_LANGUAGE_CODE", &config.language_code);
        Some(Self::new(
            &config.base_url,
            project_id,
            language_code,
            resolve_secret("DIALOGFLOW_ACCESS_TOKEN", &config.access_token),
        ))
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/v2/projects/{}/agent/sessions/{}:detectIntent",
            self.base_url,
            self.project_id,
            session_segment(session_id)
        )
    }
}

/// Dialogflow session ids are at most 36 characters of a restricted alphabet.
fn session_segment(sender: &str) -> String {
    let mut s: String = sender
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    s.truncate(MAX_SESSION_ID_LEN);
    if s.is_empty() {
        s.push_str("anonymous");
    }
    s
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentRequest<'a> {
    query_input: QueryInput<'a>,
}

#[derive(Debug, Serialize)]
struct QueryInput<'a> {
    text: TextInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextInput<'a> {
    text: &'a str,
    language_code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectIntentResponse {
    #[serde(default)]
    query_result: Option<QueryResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResult {
    #[serde(default)]
    fulfillment_text: String,
    #[serde(default)]
    intent_detection_confidence: f64,
    #[serde(default)]
    intent: Option<IntentRef>,
    #[serde(default)]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentRef {
    #[serde(default)]
    display_name: Option<String>,
}

fn into_detected(res: DetectIntentResponse) -> Option<DetectedIntent> {
    let r = res.query_result?;
    Some(DetectedIntent {
        text: r.fulfillment_text,
        confidence: r.intent_detection_confidence,
        language: r.language_code.filter(|l| !l.is_empty()),
        intent_name: r.intent.and_then(|i| i.display_name),
    })
}

#[async_trait]
impl IntentBackend for DialogflowClient {
    fn name(&self) -> &str {
        NAME
    }

    async fn detect(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<DetectedIntent>, BackendError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| BackendError::not_configured(NAME, "access token not set"))?;
        let body = DetectIntentRequest {
            query_input: QueryInput {
                text: TextInput {
                    text,
                    language_code: &self.language_code,
                },
            },
        };
        let res = self
            .client
            .post(self.session_url(session_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(NAME, e))?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::status(NAME, status, body));
        }
        let data: DetectIntentResponse = res
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(NAME, e))?;
        Ok(into_detected(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_segment_is_sanitized() {
        assert_eq!(session_segment("6281234567890@c.us"), "6281234567890-c-us");
        assert_eq!(session_segment(""), "anonymous");
        assert_eq!(session_segment(&"a".repeat(80)).len(), MAX_SESSION_ID_LEN);
    }

    #[test]
    fn url_has_project_and_session() {
        let c = DialogflowClient::new("https://df.example/", "shop-bot", "id", None);
        assert_eq!(
            c.session_url("42"),
            "https://df.example/v2/projects/shop-bot/agent/sessions/42:detectIntent"
        );
    }

    #[test]
    fn parses_query_result() {
        let raw = r#"{
            "responseId": "r1",
            "queryResult": {
                "queryText": "jam buka toko?",
                "fulfillmentText": "Toko buka jam 08.00 - 21.00",
                "intentDetectionConfidence": 0.85,
                "intent": { "name": "projects/x/agent/intents/1", "displayName": "jam_buka" },
                "languageCode": "id"
            }
        }"#;
        let parsed: DetectIntentResponse = serde_json::from_str(raw).expect("parse");
        let intent = into_detected(parsed).expect("intent");
        assert_eq!(intent.text, "Toko buka jam 08.00 - 21.00");
        assert_eq!(intent.confidence, 0.85);
        assert_eq!(intent.language.as_deref(), Some("id"));
        assert_eq!(intent.intent_name.as_deref(), Some("jam_buka"));
    }

    #[test]
    fn missing_query_result_is_none() {
        let parsed: DetectIntentResponse = serde_json::from_str("{}").expect("parse");
        assert!(into_detected(parsed).is_none());
    }

    #[tokio::test]
    async fn missing_token_is_permanent() {
        let c = DialogflowClient::new("http://127.0.0.1:9", "p", "id", None);
        let err = c.detect("s", "hi").await.expect_err("no token");
        assert!(!err.is_retryable());
    }
}
