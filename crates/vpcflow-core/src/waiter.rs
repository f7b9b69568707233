//! Waiting for a remote object to reach a lifecycle state
//!
//! The provider API is eventually consistent: right after a mutation, a
//! describe call may not see the object yet, or may report a stale state.
//! [`wait_for_state`] polls a [`Probe`] on a fixed interval until the object
//! reports the target state, reports a state nobody declared, or the timeout
//! runs out.

use crate::error::{CloudError, ProviderError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Target label meaning "the object no longer exists"
pub const ABSENT: &str = "absent";

/// One observation of a remote object
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult<T> {
    /// `None` iff the object does not exist (yet, or anymore)
    pub object: Option<T>,
    /// Lifecycle state label; meaningless when `object` is `None`
    pub state: String,
}

impl<T> ProbeResult<T> {
    pub fn found(object: T, state: impl Into<String>) -> Self {
        Self {
            object: Some(object),
            state: state.into(),
        }
    }

    pub fn absent() -> Self {
        Self {
            object: None,
            state: String::new(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.object.is_none()
    }
}

/// A single remote read used by the waiter.
///
/// `elapsed` is the time since the waiter's first call. Probes that have to
/// paper over known provider lag use it instead of keeping their own clock.
#[async_trait]
pub trait Probe: Send + Sync {
    type Object: Send;

    async fn probe(
        &self,
        elapsed: Duration,
    ) -> std::result::Result<ProbeResult<Self::Object>, ProviderError>;
}

/// What to wait for
#[derive(Debug, Clone)]
pub struct ConvergenceSpec {
    /// States that are expected on the way to `target`
    pub pending: Vec<String>,
    pub target: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ConvergenceSpec {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            pending: Vec::new(),
            target: target.into(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Waits until the object disappears
    pub fn absent() -> Self {
        Self::new(ABSENT)
    }

    pub fn with_pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = states.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn targets_absence(&self) -> bool {
        self.target == ABSENT
    }

    fn is_expected(&self, state: &str) -> bool {
        state == self.target || self.pending.iter().any(|p| p == state)
    }
}

/// Polls `probe` until it reports `spec.target`.
///
/// # Returns
/// * `Ok(Some(object))` - the object observed in the target state
/// * `Ok(None)` - the target was [`ABSENT`] and the object is gone
/// * `Err(CloudError::UnexpectedState)` - a state outside `pending ∪ {target}`
/// * `Err(CloudError::Timeout)` - `spec.timeout` elapsed first
/// * `Err(CloudError::Provider)` - the probe itself failed; not retried
pub async fn wait_for_state<P>(spec: &ConvergenceSpec, probe: &P) -> Result<Option<P::Object>>
where
    P: Probe,
    P::Object: Serialize,
{
    wait_for_state_until(spec, probe, std::future::pending::<()>()).await
}

/// Like [`wait_for_state`], but returns `CloudError::Cancelled` as soon as
/// `cancel` resolves.
pub async fn wait_for_state_until<P, C>(
    spec: &ConvergenceSpec,
    probe: &P,
    cancel: C,
) -> Result<Option<P::Object>>
where
    P: Probe,
    P::Object: Serialize,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    let start = Instant::now();
    let mut last_state: Option<String> = None;
    let mut last_object: Option<serde_json::Value> = None;
    let mut attempt: u32 = 0;

    loop {
        let elapsed = start.elapsed();
        let observed = tokio::select! {
            biased;
            _ = &mut cancel => return Err(cancelled(spec)),
            observed = probe.probe(elapsed) => observed?,
        };
        attempt += 1;

        match observed.object {
            None if spec.targets_absence() => {
                tracing::debug!("Object is gone after {} probe(s)", attempt);
                return Ok(None);
            }
            None => {
                // Not visible yet: read-after-write lag
                tracing::debug!(
                    "Probe {} found no object yet, waiting for '{}'",
                    attempt,
                    spec.target
                );
            }
            Some(object) => {
                if observed.state == spec.target {
                    tracing::debug!("Reached '{}' after {} probe(s)", spec.target, attempt);
                    return Ok(Some(object));
                }
                if !spec.is_expected(&observed.state) {
                    tracing::warn!(
                        "Unexpected state '{}' while waiting for '{}'",
                        observed.state,
                        spec.target
                    );
                    return Err(CloudError::UnexpectedState {
                        state: observed.state,
                        target: spec.target.clone(),
                        pending: spec.pending.clone(),
                    });
                }
                tracing::debug!(
                    "Probe {} reported '{}', waiting for '{}'",
                    attempt,
                    observed.state,
                    spec.target
                );
                last_object = match serde_json::to_value(&object) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::debug!("Could not snapshot the last object: {}", e);
                        None
                    }
                };
                last_state = Some(observed.state);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= spec.timeout {
            tracing::warn!(
                "Timed out after {:?} waiting for '{}' (last state: {:?})",
                elapsed,
                spec.target,
                last_state
            );
            return Err(CloudError::Timeout {
                target: spec.target.clone(),
                elapsed_secs: elapsed.as_secs(),
                last_state,
                last_object,
                last_error: None,
            });
        }

        let delay = spec.poll_interval.min(spec.timeout - elapsed);
        tokio::select! {
            biased;
            _ = &mut cancel => return Err(cancelled(spec)),
            _ = sleep(delay) => {}
        }
    }
}

fn cancelled(spec: &ConvergenceSpec) -> CloudError {
    tracing::debug!("Wait for '{}' cancelled", spec.target);
    CloudError::Cancelled {
        target: spec.target.clone(),
    }
}
