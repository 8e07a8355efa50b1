//! Transport retries with capped exponential backoff.
//!
//! Only network failures, 429 and 5xx are repeated here. A stale `updateTime`
//! needs a fresh read first, so the quota repository runs its own loop for it.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info_span, warn, Instrument};

use crate::error::FirestoreResult;
use crate::metrics::record_retry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Defaults overridden by `FIRESTORE_MAX_RETRIES`, `FIRESTORE_RETRY_BASE_MS`
    /// and `FIRESTORE_RETRY_MAX_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let parse = |key: &str| std::env::var(key).ok()?.trim().parse::<u64>().ok();
        let mut config = Self::default();
        if let Some(n) = parse("FIRESTORE_MAX_RETRIES") {
            config.max_retries = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(ms) = parse("FIRESTORE_RETRY_BASE_MS") {
            config.base_delay_ms = ms;
        }
        if let Some(ms) = parse("FIRESTORE_RETRY_MAX_MS") {
            config.max_delay_ms = ms;
        }
        config
    }

    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Pause before retry number `retry` (0-based). A server hint wins;
    /// otherwise a jittered share of `base * 2^retry`, never below `base`.
    fn backoff(&self, retry: u32, server_hint_ms: Option<u64>) -> Duration {
        if let Some(ms) = server_hint_ms {
            return Duration::from_millis(ms);
        }
        let ceiling = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);
        let jittered = ceiling.saturating_mul(jitter_permille()) / 1_000;
        Duration::from_millis(jittered.max(self.base_delay_ms))
    }
}

// Clock nanos are random enough to spread concurrent retries apart.
fn jitter_permille() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos() % 1_000))
        .unwrap_or(500)
}

/// Run `op`, repeating it on transient errors up to `config.max_retries` times.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let mut retry = 0;
    loop {
        let span = info_span!("firestore_retry", operation, attempt = retry + 1);
        let err = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < config.max_retries => err,
            Err(err) => return Err(err),
        };

        let delay = config.backoff(retry, err.retry_after_ms());
        warn!(
            operation,
            attempt = retry + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient Firestore failure, retrying"
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        retry += 1;
    }
}
