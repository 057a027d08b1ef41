//! Bounded exponential-backoff retry for capability calls.
//!
//! Both the embedding and the generation paths go through [`with_retry`]:
//!
//! - transient failures (and timeouts) → retry after `base_delay × 2^(n-1)`,
//!   capped at `max_delay`
//! - permanent failures → surfaced immediately as
//!   [`RagError::PermanentCapability`]
//! - retry budget exhausted → [`RagError::CapabilityUnavailable`]
//!
//! Backoff sleeps are ordinary `.await` points, so dropping the caller's
//! future cancels the retry loop cleanly.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Capability, CapabilityError, RagError, Result};

/// Retry budget and backoff schedule for one capability.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout. Expiry counts as a transient failure.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt with no timeout.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (retry - 1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` under `policy`, returning the value and the number of attempts made.
///
/// `op` receives the 0-based attempt number.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    capability: Capability,
    mut op: F,
) -> Result<(T, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, CapabilityError>>,
{
    let mut last_err: Option<CapabilityError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                %capability,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = last_err.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                "Retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::transient(
                    capability,
                    format!("timed out after {}ms", limit.as_millis()),
                )),
            },
            None => op(attempt).await,
        };

        match outcome {
            Ok(value) => return Ok((value, attempt + 1)),
            Err(e) if e.is_transient() => last_err = Some(e),
            Err(e) => {
                return Err(RagError::PermanentCapability {
                    capability: e.capability,
                    message: e.message,
                })
            }
        }
    }

    Err(RagError::CapabilityUnavailable {
        capability,
        attempts: policy.max_retries + 1,
        last_error: last_err
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}
