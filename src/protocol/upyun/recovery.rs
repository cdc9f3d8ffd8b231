//! Bounded retry of transient failures
//!
//! Only [`UpyunError::Network`] failures are retried; anything the service
//! answered is surfaced on the first attempt. The failure counter is owned
//! by the caller so that a budget can span several requests, which is how
//! the recursive listing shares one budget across the whole traversal.
//!
//! ```no_run
//! # use upyun::protocol::upyun::recovery::{with_retry, RetryPolicy};
//! # use upyun::protocol::upyun::UpyunError;
//! # async fn demo() -> Result<(), UpyunError> {
//! let policy = RetryPolicy::listing(5);
//! let mut failures = 0;
//! let value = with_retry(&policy, &mut failures, "list /", || async {
//!     Ok::<_, UpyunError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use super::error::{UpyunError, UpyunResult};
use super::LIST_RETRY_DELAY;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of failed attempts, 0 = unbounded
    pub max_attempts: u32,

    /// Fixed delay before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    /// Listing requests: fixed 10 ms between attempts
    pub fn listing(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: LIST_RETRY_DELAY,
        }
    }

    /// Part uploads: immediate retries
    pub fn parts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Whether another attempt is allowed after `failures` failed ones
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts == 0 || failures < self.max_attempts
    }
}

/// Run `operation` until it succeeds, fails permanently or the budget runs out
///
/// `failures` is incremented for every transient failure and is left at its
/// final value so callers can carry it forward.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    failures: &mut u32,
    operation: &str,
    mut attempt: F,
) -> UpyunResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = UpyunResult<T>>,
{
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                *failures += 1;
                if !policy.allows_retry(*failures) {
                    return Err(UpyunError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: *failures,
                        last: Box::new(e),
                    });
                }

                warn!(
                    operation,
                    failures = *failures,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Transient failure, retrying"
                );
                if !policy.delay.is_zero() {
                    sleep(policy.delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
