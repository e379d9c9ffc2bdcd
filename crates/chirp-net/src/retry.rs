//! Reconnect policy for the transport connector.
//!
//! The policy is stateless apart from a one-shot "skip the next backoff"
//! flag. Attempt numbers are owned by the caller, which resets them after a
//! successful connect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use chirp_shared::constants::{BACKOFF_BASE_MS, BACKOFF_MAX_MS};

use crate::error::ConnectionError;

#[derive(Debug)]
pub struct ConnectionRetryHandler {
    skip_backoff: AtomicBool,
    base: Duration,
    max: Duration,
}

impl ConnectionRetryHandler {
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_millis(BACKOFF_BASE_MS),
            Duration::from_millis(BACKOFF_MAX_MS),
        )
    }

    pub fn with_limits(base: Duration, max: Duration) -> Self {
        Self {
            skip_backoff: AtomicBool::new(false),
            base,
            max,
        }
    }

    /// Decide whether a failed connection should be attempted again.
    pub fn should_retry(&self, cause: &ConnectionError, attempt: u32) -> bool {
        let retry = cause.is_retriable();
        debug!(attempt, retry, error = %cause, "Evaluated connection failure");
        retry
    }

    /// `base * 2^attempt`, capped at `max`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Wait before the next attempt, unless [`reset_delay`](Self::reset_delay)
    /// was called since the last wait.
    pub async fn apply_retry_delay(&self, attempt: u32) {
        if self.skip_backoff.swap(false, Ordering::SeqCst) {
            debug!(attempt, "Skipping backoff");
            return;
        }
        let delay = self.compute_delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        tokio::time::sleep(delay).await;
    }

    /// Make the next [`apply_retry_delay`](Self::apply_retry_delay) return
    /// immediately.
    pub fn reset_delay(&self) {
        self.skip_backoff.store(true, Ordering::SeqCst);
    }
}

impl Default for ConnectionRetryHandler {
    fn default() -> Self {
        Self::new()
    }
}
