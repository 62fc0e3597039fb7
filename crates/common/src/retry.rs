//! Bounded retries with exponential backoff for external calls.
//!
//! Every call is wrapped in a per-call timeout. Only retryable errors are
//! retried, and never more than `max_attempts` times in total.

use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    /// Backoff schedule for callers that drive their own attempts.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Await `fut`, turning an elapsed deadline into `AppError::Timeout`.
pub async fn with_timeout<T, Fut>(service: &str, limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            service: service.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    service: &str,
    call_timeout: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    retry(policy.backoff(), || {
        attempt += 1;
        let current = attempt;
        let call = op();
        async move {
            with_timeout(service, call_timeout, call).await.map_err(|e| {
                if !e.is_retryable() || current >= max_attempts {
                    backoff::Error::permanent(e)
                } else {
                    warn!(
                        service,
                        attempt = current,
                        max_attempts,
                        error = %e,
                        "External call failed, retrying"
                    );
                    backoff::Error::transient(e)
                }
            })
        }
    })
    .await
}
