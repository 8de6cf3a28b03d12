//! Retry controller with exponential backoff.
//!
//! Wraps any fallible async operation. Transient failures (by status code or
//! by message substring) are retried with exponential backoff and symmetric
//! jitter; a provider `Retry-After` hint replaces the computed delay.
//! Operations passed here must be idempotent.

use chrono::{DateTime, Utc};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::error::LlmError;

// ============================================================================
// Configuration
// ============================================================================

/// Backoff and classification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Symmetric jitter as a fraction of the delay (0.25 = ±25%).
    pub jitter: f64,
    /// HTTP status codes treated as transient.
    pub retryable_status_codes: Vec<u16>,
    /// Lowercase message fragments treated as transient.
    pub retryable_messages: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 64_000,
            multiplier: 2.0,
            jitter: 0.25,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_messages: vec![
                "timeout".to_string(),
                "timed out".to_string(),
                "connection reset".to_string(),
                "econnreset".to_string(),
                "rate limit".to_string(),
                "quota exceeded".to_string(),
            ],
        }
    }
}

impl RetryConfig {
    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial and maximum delays.
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay_ms = initial.as_millis() as u64;
        self.max_delay_ms = max.as_millis().max(initial.as_millis()) as u64;
        self
    }

    /// Set jitter, clamped to [0, 1].
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether an error should be retried.
    pub fn is_retryable<E: Retryable>(&self, error: &E) -> bool {
        if let Some(code) = error.status_code() {
            if self.retryable_status_codes.contains(&code) {
                return true;
            }
        }
        let message = error.message().to_lowercase();
        self.retryable_messages
            .iter()
            .any(|fragment| message.contains(fragment.as_str()))
    }

    /// Delay before the retry following `attempt` (0-based), without jitter.
    ///
    /// A provider hint takes precedence over the exponential schedule; both
    /// are bounded by `max_delay_ms`.
    pub fn base_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        if let Some(hint) = retry_after {
            return hint.min(max);
        }
        let exp = self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let millis = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Apply symmetric jitter to a delay.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let mut rng = rand::rng();
        let factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Errors that carry enough information to be classified for retry.
pub trait Retryable {
    /// HTTP-like status code, if any.
    fn status_code(&self) -> Option<u16>;

    /// Provider-supplied wait hint.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Human-readable message used for substring classification.
    fn message(&self) -> String;
}

impl Retryable for LlmError {
    fn status_code(&self) -> Option<u16> {
        LlmError::status_code(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        LlmError::retry_after(self)
    }

    fn message(&self) -> String {
        self.to_string()
    }
}

/// Outcome of a failed retry loop.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// A non-retryable error ended the loop early.
    #[error(transparent)]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// The underlying cause.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal(e) => e,
        }
    }

    /// Whether the retry budget ran out.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

// ============================================================================
// Retry loop
// ============================================================================

/// Run `operation` until it succeeds, fails fatally, or the budget runs out.
///
/// On each failure the budget check comes first: once `max_retries` retries
/// have been spent the last error is wrapped in [`RetryError::Exhausted`].
/// Otherwise a non-retryable error returns [`RetryError::Fatal`] at once.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= config.max_retries {
                    tracing::warn!(
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: err,
                    });
                }
                if !config.is_retryable(&err) {
                    tracing::debug!(attempt = attempt + 1, error = %err, "Non-retryable error");
                    return Err(RetryError::Fatal(err));
                }

                let delay = config.jittered(config.base_delay(attempt, err.retry_after()));
                tracing::info!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Parse a `Retry-After` header value.
///
/// Accepts delta-seconds (fractional allowed) or an HTTP date. Negative
/// values and dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<f64>() {
        if !secs.is_finite() {
            return None;
        }
        return Some(Duration::from_secs_f64(secs.max(0.0)));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
            .with_jitter(0.0)
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.initial_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 64_000);
        assert_eq!(config.retryable_status_codes, vec![408, 429, 500, 502, 503, 504]);
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay(0, None), Duration::from_secs(1));
        assert_eq!(config.base_delay(1, None), Duration::from_secs(2));
        assert_eq!(config.base_delay(3, None), Duration::from_secs(8));
        assert_eq!(config.base_delay(10, None), Duration::from_secs(64));
    }

    #[test]
    fn test_retry_after_overrides_schedule() {
        let config = RetryConfig::default();
        assert_eq!(
            config.base_delay(4, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            config.base_delay(0, Some(Duration::from_secs(500))),
            Duration::from_secs(64)
        );
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let d = config.jittered(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_classification() {
        let config = RetryConfig::default();
        assert!(config.is_retryable(&LlmError::api(503, "unavailable")));
        assert!(config.is_retryable(&LlmError::rate_limited("slow down")));
        assert!(config.is_retryable(&LlmError::RequestFailed("Connection reset by peer".into())));
        assert!(config.is_retryable(&LlmError::api(403, "Quota exceeded for model")));
        assert!(!config.is_retryable(&LlmError::api(400, "bad request")));
        assert!(!config.is_retryable(&LlmError::InvalidModel("x".into())));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("-3"), Some(Duration::ZERO));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_future_date() {
        let future = (Utc::now() + chrono::Duration::seconds(30)).to_rfc2822();
        let parsed = parse_retry_after(&future).expect("valid date");
        assert!(parsed > Duration::from_secs(25) && parsed <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(LlmError::api(502, "bad gateway"))
                } else {
                    Ok("ok")
                }
            },
            &fast_config(5),
        )
        .await;

        assert_eq!(result.expect("should succeed"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::api(401, "unauthorized"))
            },
            &fast_config(5),
        )
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::api(500, format!("failure {}", n)))
            },
            &fast_config(2),
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("failure 2"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
