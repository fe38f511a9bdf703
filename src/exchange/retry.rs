//! Bounded retry with exponential backoff + jitter for collaborator calls

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const BACKOFF_JITTER_RATIO: f64 = 0.20;

/// Retry policy applied at the collaborator boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// No retries, no sleeping
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), capped and jittered
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped_attempt = attempt.saturating_sub(1).min(16);
        let base = self.base_backoff_ms.saturating_mul(1u64 << capped_attempt);
        let bounded = base.min(self.max_backoff_ms);
        if bounded == 0 {
            return Duration::ZERO;
        }

        let unit: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let jittered = (bounded as f64) * (1.0 + unit * BACKOFF_JITTER_RATIO);
        Duration::from_millis(jittered.round().clamp(0.0, self.max_backoff_ms as f64) as u64)
    }
}

/// Run `call` until it succeeds or the policy is exhausted
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.backoff_delay(attempt);
                warn!(
                    operation = %operation,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Collaborator call failed, retrying with backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "{} failed after {} attempts",
                    operation,
                    attempt + 1
                )))
            }
        }
    }
}
