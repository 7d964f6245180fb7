use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a failed call should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Quota/throttle, timeout or transient network failure. Retried with
    /// exponential backoff.
    Retryable,
    /// Schema errors, non-429 4xx, unsupported input. Surfaced immediately.
    Fatal,
}

/// Errors feed the retry loop through this trait so the classification in
/// one place covers LLM calls, generator calls and the deck builder alike.
pub trait Classify {
    fn retry_class(&self) -> RetryClass;
}

/// String markers the upstream providers use for quota exhaustion.
const QUOTA_MARKERS: [&str; 3] = ["429", "RESOURCE_EXHAUSTED", "Quota exceeded"];

/// Fallback classification for errors that only expose a message.
pub fn classify_message(message: &str) -> RetryClass {
    if QUOTA_MARKERS.iter().any(|m| message.contains(m)) {
        return RetryClass::Retryable;
    }
    let lowered = message.to_lowercase();
    if lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
    {
        return RetryClass::Retryable;
    }
    RetryClass::Fatal
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff for a 0-based attempt index: `base_delay * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// A successful call plus what it took to get there. `retries_absorbed` is
/// the number of retryable failures swallowed before success; the Stage-6
/// error summary reports these even when the slide ultimately succeeds.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub retries_absorbed: u32,
}

/// A call that failed past the retry budget (or fatally on first contact).
#[derive(Debug, Error)]
#[error("{name} failed after {attempts} attempt(s): {error}")]
pub struct RetryError<E: fmt::Display + fmt::Debug> {
    pub name: String,
    pub attempts: u32,
    pub error: E,
}

/// Run `op` with exponential backoff on retryable failures. Fatal failures
/// return on the first attempt; retryable ones are re-run up to
/// `policy.max_retries` extra times. Sleeps are plain `tokio::time::sleep`,
/// cancelled by dropping the future.
pub async fn call_with_retry<T, E, F, Fut>(
    mut op: F,
    policy: &RetryPolicy,
    name: &str,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    E: Classify + fmt::Display + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt + 1,
                    retries_absorbed: attempt,
                })
            }
            Err(err) => {
                let class = err.retry_class();
                if class == RetryClass::Fatal || attempt >= policy.max_retries {
                    if class == RetryClass::Retryable {
                        warn!(call = name, attempts = attempt + 1, error = %err, "retry budget exhausted");
                    }
                    return Err(RetryError {
                        name: name.to_string(),
                        attempts: attempt + 1,
                        error: err,
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    call = name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Minimum inter-call spacing for one service queue. Callers `acquire()`
/// before each outbound request; the limiter sleeps away whatever remains
/// of the interval since the previous call.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        let now = Instant::now();
        if let Some(previous) = *last {
            let elapsed = now.duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "rate limit delay");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(String);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Classify for TestError {
        fn retry_class(&self) -> RetryClass {
            classify_message(&self.0)
        }
    }

    #[test]
    fn quota_markers_are_retryable() {
        assert_eq!(classify_message("HTTP 429 from upstream"), RetryClass::Retryable);
        assert_eq!(classify_message("RESOURCE_EXHAUSTED"), RetryClass::Retryable);
        assert_eq!(
            classify_message("Quota exceeded for model requests"),
            RetryClass::Retryable
        );
        assert_eq!(classify_message("request timed out"), RetryClass::Retryable);
        assert_eq!(classify_message("connection refused"), RetryClass::Retryable);
    }

    #[test]
    fn client_errors_are_fatal() {
        for message in [
            "HTTP 400 bad request",
            "HTTP 401 unauthorized",
            "HTTP 403 forbidden",
            "HTTP 422 unprocessable entity",
            "schema validation failed",
        ] {
            assert_eq!(classify_message(message), RetryClass::Fatal, "{message}");
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for(30), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_and_counts_attempts() {
        let calls = AtomicU32::new(0);
        let outcome = call_with_retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError("429 too many requests".into()))
                    } else {
                        Ok("done")
                    }
                }
            },
            &RetryPolicy::default(),
            "test_call",
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.retries_absorbed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_fails_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let err = call_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError("HTTP 400 bad request".into())) }
            },
            &RetryPolicy::default(),
            "test_call",
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_reports_attempt_count() {
        let err = call_with_retry(
            || async { Err::<(), _>(TestError("RESOURCE_EXHAUSTED".into())) },
            &RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
            },
            "test_call",
        )
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn zero_interval_is_a_no_op() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = std::time::Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
