//! Timeout and retry helpers for external calls
//!
//! `bounded` wraps every call into a collaborator. `retry_read` is only used for the
//! read-only pre-flight queries (balance, oracle): retrying the loan-granting call after
//! an ambiguous outcome could duplicate a loan.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::interfaces::ProtocolError;

/// Bound a single external call. A timeout surfaces as [`ProtocolError::Timeout`].
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {}ms", operation, limit.as_millis());
            Err(ProtocolError::Timeout {
                operation,
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure
    pub initial_backoff: Duration,
    /// Per-attempt timeout
    pub call_timeout: Duration,
}

/// Retry a read-only query with exponential backoff on transient failures.
///
/// Reverts are deterministic and returned immediately.
pub async fn retry_read<T, F, Fut>(
    operation: &'static str,
    policy: RetryPolicy,
    mut query: F,
) -> Result<T, ProtocolError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProtocolError>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match bounded(operation, policy.call_timeout, query()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(
                    "{} attempt {}/{} failed: {}, retrying in {}ms",
                    operation,
                    attempt,
                    attempts,
                    e,
                    delay.as_millis()
                );
                sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
