//! Connection retry with exponential backoff.

use crate::error::{ConnectionErrorKind, RemoteError};
use std::future::Future;
use std::time::Duration;

/// How hard to try when opening a connection.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts (at least one is always made).
    pub retries: u32,
    /// Timeout for a single attempt.
    pub timeout: Duration,
    /// Delay after the first failed attempt; doubled after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(10),
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Run `attempt` until it succeeds, the policy is exhausted, or a failure
/// classifies as non-retryable.
///
/// The closure receives the 1-based attempt number and reports failures as
/// raw error text, which is classified with [`ConnectionErrorKind::classify`].
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    mut attempt: F,
) -> Result<T, RemoteError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let attempts = policy.attempts();
    let mut n = 1;
    loop {
        let message = match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(message) => message,
        };

        let kind = ConnectionErrorKind::classify(&message);
        if !kind.is_retryable() || n >= attempts {
            return Err(RemoteError::connection(endpoint, kind, message, n));
        }

        let delay = policy.delay_after(n);
        tracing::warn!(
            "Connection to {} failed ({}), retrying in {:?} (attempt {}/{})",
            endpoint,
            kind,
            delay,
            n,
            attempts
        );
        tokio::time::sleep(delay).await;
        n += 1;
    }
}
