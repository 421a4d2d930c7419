//! Text backends consulted by the router.
//!
//! Raw clients implement [`IntentBackend`] or [`TextGenerator`] and return errors. The
//! router never talks to them directly: it goes through [`IntentAdapter`] and
//! [`GeneratorAdapter`], which apply the retry policy and turn every failure into a
//! [`BackendOutcome::Failed`].

mod adapter;
mod dialogflow;
mod error;
mod gemini;
mod openai;

pub use adapter::{GeneratorAdapter, IntentAdapter};
pub use dialogflow::DialogflowClient;
pub use error::{BackendError, ErrorClass, NetworkErrorKind};
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::BackendsConfig;
use crate::retry::RetryPolicy;

/// Result of one intent-detection call.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedIntent {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub language: Option<String>,
    pub intent_name: Option<String>,
}

/// Intent detection service (e.g. Dialogflow).
#[async_trait]
pub trait IntentBackend: Send + Sync {
    fn name(&self) -> &str;
    /// `Ok(None)` when the service answered but produced no usable result.
    async fn detect(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<DetectedIntent>, BackendError>;
}

/// Generative text service (e.g. OpenAI chat completions, Gemini).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// A usable answer from a backend. Confidence and language are only set by intent detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub confidence: Option<f64>,
    pub language: Option<String>,
}

impl Answer {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            language: None,
        }
    }
}

/// Structured success/failure tag returned by every adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Answered(Answer),
    Failed { reason: String },
}

impl BackendOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        BackendOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, BackendOutcome::Answered(_))
    }
}

/// The three adapters the router is built from.
#[derive(Clone)]
pub struct Backends {
    /// None when no intent service is configured; the router then skips that step.
    pub intent: Option<IntentAdapter>,
    pub primary: GeneratorAdapter,
    pub secondary: GeneratorAdapter,
}

/// Build adapters from config. Clients without credentials are still built; their calls
/// fail as permanent errors so the fallback chain moves on.
pub fn build_backends(config: &BackendsConfig) -> Backends {
    let policy = RetryPolicy::from(config.retry);
    let intent = match DialogflowClient::from_config(&config.intent) {
        Some(client) => {
            let intent_policy = if config.intent.retry {
                policy
            } else {
                RetryPolicy::none()
            };
            log::info!(
                "backends: intent detection enabled ({})",
                client.language_code()
            );
            Some(IntentAdapter::new(Arc::new(client), intent_policy))
        }
        None => {
            log::info!("backends: intent detection disabled (no project id)");
            None
        }
    };
    let primary = OpenAiClient::from_config(&config.primary);
    let secondary = GeminiClient::from_config(&config.secondary);
    log::info!(
        "backends: primary {} ({}), secondary {} ({}), {} retries every {}ms",
        primary.name(),
        primary.model(),
        secondary.name(),
        secondary.model(),
        policy.max_retries,
        policy.delay.as_millis()
    );
    Backends {
        intent,
        primary: GeneratorAdapter::new(Arc::new(primary), policy),
        secondary: GeneratorAdapter::new(Arc::new(secondary), policy),
    }
}
