//! Error-aware retry for single idempotent provider calls
//!
//! A provider call that fails is triaged by its [`ErrorClass`]:
//!
//! - `NotFound`: the object is already gone, which counts as success
//! - `Conflict`: another object blocks the call; surfaced as-is
//! - `Retryable`: retried with a fixed backoff until the budget runs out
//! - `Unclassified`: never retried

use crate::error::{CloudError, ErrorClass, ProviderError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Retry configuration for provider calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total time allowed for all attempts
    pub budget: Duration,

    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(5 * 60),
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn new(budget: Duration, backoff: Duration) -> Self {
        Self { budget, backoff }
    }
}

/// Result of a single provider call, triaged
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// Classified error worth another attempt
    Retryable(ProviderError),
    /// Classified error that ends the operation (not-found or conflict)
    Terminal(ProviderError),
    Unclassified(ProviderError),
}

impl<T> Outcome<T> {
    pub fn classify(result: std::result::Result<T, ProviderError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => match e.class {
                ErrorClass::NotFound | ErrorClass::Conflict => Outcome::Terminal(e),
                ErrorClass::Retryable => Outcome::Retryable(e),
                ErrorClass::Unclassified => Outcome::Unclassified(e),
            },
        }
    }
}

/// What a retried call ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied<T> {
    Done(T),
    /// The provider reported the target as not found
    AlreadyGone,
}

impl<T> Applied<T> {
    pub fn is_already_gone(&self) -> bool {
        matches!(self, Applied::AlreadyGone)
    }
}

/// Runs `op` until it succeeds, fails terminally, or `config.budget` elapses.
pub async fn retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<Applied<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match Outcome::classify(op().await) {
            Outcome::Success(value) => return Ok(Applied::Done(value)),
            Outcome::Terminal(e) if e.is_not_found() => {
                tracing::debug!("Target already gone ({}), treating as success", e);
                return Ok(Applied::AlreadyGone);
            }
            Outcome::Terminal(e) => {
                tracing::debug!("Conflict on attempt {}: {}", attempt, e);
                return Err(CloudError::Conflict(e));
            }
            Outcome::Unclassified(e) => {
                tracing::warn!("Unclassified error on attempt {}, not retrying: {}", attempt, e);
                return Err(CloudError::Unclassified(e));
            }
            Outcome::Retryable(e) => {
                let elapsed = start.elapsed();
                if elapsed + config.backoff > config.budget {
                    tracing::warn!(
                        "Giving up after {} attempt(s) in {:?}: {}",
                        attempt,
                        elapsed,
                        e
                    );
                    return Err(CloudError::Timeout {
                        target: "success".to_string(),
                        elapsed_secs: elapsed.as_secs(),
                        last_state: None,
                        last_object: None,
                        last_error: Some(e),
                    });
                }
                tracing::debug!("Attempt {} failed, retrying: {}", attempt, e);
                sleep(config.backoff).await;
            }
        }
    }
}
