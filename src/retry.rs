//! Retry of mid-transfer download failures
//!
//! Only partial transfers are retried, on the same resolved URL, with a fixed delay
//! between attempts. Every other failure is returned immediately so the release
//! processor can move on to the next candidate link.
//!
//! # Example
//!
//! ```no_run
//! use release_dl::retry::{IsRetryable, RetryPolicy, download_with_retry};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Interrupted,
//!     Rejected,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Interrupted)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = RetryPolicy::new(Some(2), Duration::from_secs(5));
//! download_with_retry(&policy, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DownloadConfig;
use crate::error::Error;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the same operation should be attempted again
    fn is_retryable(&self) -> bool;
}

/// Only a stream that broke off mid-transfer is worth repeating on the same URL
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.is_partial()
    }
}

/// Retry bound and fixed delay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `None` retries without bound
    pub max_retries: Option<u32>,
    /// Pause before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy with an explicit bound and delay
    pub fn new(max_retries: Option<u32>, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Policy from the download settings
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(config.max_partial_retries, config.partial_retry_delay)
    }

    fn allows(&self, retries_so_far: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_so_far < max)
    }
}

/// Execute an async operation, repeating it while it fails with a retryable error
///
/// Returns the successful result, the first non-retryable error, or the last
/// retryable error once the bound is exhausted.
pub async fn download_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "download succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && policy.allows(retries) => {
                retries += 1;
                tracing::warn!(
                    error = %e,
                    retry = retries,
                    max_retries = ?policy.max_retries,
                    delay_ms = policy.delay.as_millis(),
                    "partial download, retrying"
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = retries + 1, "partial download retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
