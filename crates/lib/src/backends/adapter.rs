//! Adapters: retry + failure capture around raw backend clients.
//!
//! A client that panics is reported the same way as one that errors, so the router
//! still moves on to the next step of the chain.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{Answer, BackendError, BackendOutcome, IntentBackend, TextGenerator};
use crate::retry::{retrying_call, RetryPolicy};
use crate::router::panic_message;

fn panicked(backend: &str, payload: Box<dyn std::any::Any + Send>) -> BackendOutcome {
    let message = panic_message(payload.as_ref());
    log::error!("{}: backend panicked: {}", backend, message);
    BackendOutcome::failed(format!("{} panicked: {}", backend, message))
}

/// Wraps an intent backend. Never fails; errors become [`BackendOutcome::Failed`].
#[derive(Clone)]
pub struct IntentAdapter {
    backend: Arc<dyn IntentBackend>,
    policy: RetryPolicy,
}

impl IntentAdapter {
    pub fn new(backend: Arc<dyn IntentBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub async fn invoke(&self, session_id: &str, text: &str) -> BackendOutcome {
        let backend = self.backend.as_ref();
        let call = retrying_call(backend.name(), &self.policy, BackendError::is_retryable, || {
            backend.detect(session_id, text)
        });
        let res = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => return panicked(backend.name(), payload),
        };
        match res {
            Ok(Some(intent)) => {
                log::debug!(
                    "{}: intent {:?} confidence {:.3}",
                    backend.name(),
                    intent.intent_name,
                    intent.confidence
                );
                BackendOutcome::Answered(Answer {
                    text: intent.text,
                    confidence: Some(intent.confidence),
                    language: intent.language,
                })
            }
            Ok(None) => BackendOutcome::failed(format!("{}: no result", backend.name())),
            Err(e) => {
                log::warn!("{}: intent detection failed: {}", backend.name(), e);
                BackendOutcome::failed(e.to_string())
            }
        }
    }
}

/// Wraps a text generator with the retry policy. Never fails; errors become
/// [`BackendOutcome::Failed`].
#[derive(Clone)]
pub struct GeneratorAdapter {
    backend: Arc<dyn TextGenerator>,
    policy: RetryPolicy,
}

impl GeneratorAdapter {
    pub fn new(backend: Arc<dyn TextGenerator>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub async fn invoke(&self, prompt: &str) -> BackendOutcome {
        let backend = self.backend.as_ref();
        let call = retrying_call(backend.name(), &self.policy, BackendError::is_retryable, || {
            backend.generate(prompt)
        });
        let res = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => return panicked(backend.name(), payload),
        };
        match res {
            Ok(text) => BackendOutcome::Answered(Answer::text(text)),
            Err(e) => {
                log::warn!("{}: generation failed: {}", backend.name(), e);
                BackendOutcome::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DetectedIntent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        status: u16,
    }

    #[async_trait]
    impl TextGenerator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(BackendError::status("flaky", self.status, String::new()))
            } else {
                Ok(format!("echo: {}", prompt))
            }
        }
    }

    struct NoIntent;

    #[async_trait]
    impl IntentBackend for NoIntent {
        fn name(&self) -> &str {
            "none"
        }

        async fn detect(
            &self,
            _session_id: &str,
            _text: &str,
        ) -> Result<Option<DetectedIntent>, BackendError> {
            Ok(None)
        }
    }

    struct Exploding;

    #[async_trait]
    impl TextGenerator for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
            panic!("client bug");
        }
    }

    #[async_trait]
    impl IntentBackend for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        async fn detect(
            &self,
            _session_id: &str,
            _text: &str,
        ) -> Result<Option<DetectedIntent>, BackendError> {
            panic!("client bug");
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn generator_retries_transient_errors() {
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: 2,
            status: 503,
        });
        let adapter = GeneratorAdapter::new(flaky.clone(), fast_policy());
        let out = adapter.invoke("hi").await;
        assert_eq!(out, BackendOutcome::Answered(Answer::text("echo: hi")));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn generator_exhaustion_becomes_failed() {
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            status: 429,
        });
        let adapter = GeneratorAdapter::new(flaky.clone(), fast_policy());
        let out = adapter.invoke("hi").await;
        assert!(!out.is_answered());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn generator_permanent_error_is_not_retried() {
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            status: 401,
        });
        let adapter = GeneratorAdapter::new(flaky.clone(), fast_policy());
        assert!(!adapter.invoke("hi").await.is_answered());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn intent_without_result_is_failed() {
        let adapter = IntentAdapter::new(Arc::new(NoIntent), RetryPolicy::none());
        let out = adapter.invoke("628123@c.us", "apa kabar").await;
        assert_eq!(out, BackendOutcome::failed("none: no result"));
    }

    #[tokio::test]
    async fn panicking_client_becomes_failed() {
        let generator = GeneratorAdapter::new(Arc::new(Exploding), fast_policy());
        assert_eq!(
            generator.invoke("hi").await,
            BackendOutcome::failed("exploding panicked: client bug")
        );
        let intent = IntentAdapter::new(Arc::new(Exploding), RetryPolicy::none());
        assert!(!intent.invoke("628123@c.us", "hi").await.is_answered());
    }
}
