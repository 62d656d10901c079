//! Retry policy shared by every remote client and the store.
//!
//! One [`RetryPolicy`] is built from `[retry]` in the config and handed to
//! each client, so the backoff schedule lives in exactly one place.
//!
//! Backoff before retry `n` (1-based) is `base * 2^(n-1)`, clamped to
//! `[min, max]`. With the defaults (base 1s, min 4s, max 10s) the waits are
//! 4s, 4s, 4s, 8s, 10s, ... Only [`FunnelError::is_transient`](crate::error::FunnelError::is_transient) errors are
//! retried; everything else returns immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            min: Duration::from_secs(4),
            max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_secs(config.backoff_base_secs),
            min: Duration::from_secs(config.backoff_min_secs),
            max: Duration::from_secs(config.backoff_max_secs),
        }
    }

    /// A single attempt, no waiting. Used by tests and one-shot commands.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::ZERO,
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Same attempt count, zero backoff.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::no_retry()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(1u32 << exp);
        raw.clamp(self.min, self.max.max(self.min))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `label` names the call in log output (e.g. `"scoring"`).
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        call = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
