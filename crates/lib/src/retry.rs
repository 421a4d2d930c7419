//! Fixed-delay retry wrapper shared by every backend call.
//!
//! An operation is attempted once and then retried up to `max_retries` more times while
//! the caller-supplied classifier reports the error as retryable. The pause between
//! attempts is constant; it does not grow with the attempt number.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 1000;

/// Retry budget and inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Fixed pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Serialized form of [`RetryPolicy`] (`backends.retry` in the config file).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(c: RetryConfig) -> Self {
        RetryPolicy::new(c.max_retries, Duration::from_millis(c.delay_ms))
    }
}

/// Run `operation`, retrying while `is_retryable` accepts the error and budget remains.
///
/// Returns the first success, or the last error once the error is not retryable or the
/// budget is spent. `label` only appears in log lines.
pub async fn retrying_call<T, E, F, Fut, P>(
    label: &str,
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut remaining = policy.max_retries;
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    log::debug!("retry: {} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if remaining == 0 || !is_retryable(&e) {
                    return Err(e);
                }
                remaining -= 1;
                log::warn!(
                    "retry: {} attempt {} failed ({}), retrying in {}ms ({} left)",
                    label,
                    attempt,
                    e,
                    policy.delay.as_millis(),
                    remaining
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Busy,
        Denied,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn busy_is_retryable(e: &TestError) -> bool {
        *e == TestError::Busy
    }

    #[test]
    fn default_policy_is_three_retries_one_second() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.max_attempts(), 4);
        assert_eq!(p.delay, Duration::from_millis(1000));
        assert_eq!(RetryPolicy::from(RetryConfig::default()), p);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_exhausts_budget_then_propagates() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let res: Result<(), TestError> = retrying_call("test", &policy, busy_is_retryable, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Busy) }
        })
        .await;
        assert_eq!(res, Err(TestError::Busy));
        assert_eq!(calls.load(Ordering::SeqCst), policy.max_attempts());
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_attempted_once() {
        let calls = AtomicU32::new(0);
        let res: Result<(), TestError> =
            retrying_call("test", &RetryPolicy::default(), busy_is_retryable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Denied) }
            })
            .await;
        assert_eq!(res, Err(TestError::Denied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let res = retrying_call("test", &RetryPolicy::default(), busy_is_retryable, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Busy)
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(res, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_between_attempts_is_fixed() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        let start = tokio::time::Instant::now();
        let _: Result<(), TestError> =
            retrying_call("test", &policy, busy_is_retryable, || async { Err(TestError::Busy) })
                .await;
        // three pauses of 250ms, no growth
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let _: Result<(), TestError> =
            retrying_call("test", &RetryPolicy::none(), busy_is_retryable, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Busy) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
