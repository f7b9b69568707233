//! Adapter contract and the pieces adapters share

use crate::api::NetworkApi;
use crate::error::ApiResult;
use crate::session::Session;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use vpcflow_core::{
    ABSENT, Applied, CloudError, Probe, ProbeResult, ProviderError, Result, retry, wait_for_state,
};

/// Create/Read/Update/Delete for one resource type
#[async_trait]
pub trait Resource: Send + Sync {
    /// Typed attributes, both desired and observed
    type Spec: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    /// Resource type name used in checkpoints and errors
    const TYPE: &'static str;

    /// Whether going from `old` to `new` changes an immutable attribute
    fn requires_replacement(old: &Self::Spec, new: &Self::Spec) -> bool;

    /// Creates the resource, waits for it, then pushes the remaining attributes
    async fn create(&self, session: &Session, desired: &Self::Spec) -> Result<String>;

    /// `Ok(None)` when the resource no longer exists
    async fn read(&self, session: &Session, id: &str) -> Result<Option<Self::Spec>>;

    /// Applies mutable attribute changes, checkpointing after each one
    async fn update(
        &self,
        session: &Session,
        id: &str,
        old: &Self::Spec,
        new: &Self::Spec,
    ) -> Result<()>;

    /// Deletes the resource and waits until it is gone. Already gone is success.
    async fn delete(&self, session: &Session, id: &str) -> Result<()>;
}

/// An API object with a lifecycle state
#[async_trait]
pub trait Describe: Serialize + Send + Sync + Sized {
    async fn describe(api: &dyn NetworkApi, id: &str) -> ApiResult<Self>;

    fn state(&self) -> String;

    /// Objects still listed but already dead (e.g. a disassociated association)
    fn is_gone(&self) -> bool {
        false
    }
}

/// Probe reading an object's own lifecycle state
pub struct StateProbe<'a, T> {
    api: &'a dyn NetworkApi,
    id: &'a str,
    _object: PhantomData<fn() -> T>,
}

impl<'a, T> StateProbe<'a, T> {
    pub fn new(api: &'a dyn NetworkApi, id: &'a str) -> Self {
        Self {
            api,
            id,
            _object: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Describe> Probe for StateProbe<'_, T> {
    type Object = T;

    async fn probe(&self, _elapsed: Duration) -> std::result::Result<ProbeResult<T>, ProviderError> {
        match T::describe(self.api, self.id).await {
            Ok(object) if object.is_gone() => Ok(ProbeResult::absent()),
            Ok(object) => {
                let state = object.state();
                Ok(ProbeResult::found(object, state))
            }
            Err(e) if e.is_not_found() => Ok(ProbeResult::absent()),
            Err(e) => Err(e),
        }
    }
}

/// Single read; not-found becomes `None`
pub(crate) async fn describe_opt<T: Describe>(
    api: &dyn NetworkApi,
    id: &str,
) -> std::result::Result<Option<T>, ProviderError> {
    match T::describe(api, id).await {
        Ok(object) if object.is_gone() => Ok(None),
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Waits for `id` to reach `target`, returning the converged object
pub(crate) async fn wait_until<T: Describe>(
    session: &Session,
    id: &str,
    target: &str,
    pending: &[&str],
    timeout_secs: u64,
) -> Result<T> {
    let spec = session
        .wait_spec(target, timeout_secs)
        .with_pending(pending.iter().copied());
    wait_for_state(&spec, &StateProbe::<T>::new(session.api(), id))
        .await?
        .ok_or_else(|| CloudError::NotFound(id.to_string()))
}

/// Retries `delete`, then waits for the object to disappear unless the
/// provider already reported it missing
pub(crate) async fn delete_and_wait<T, F, Fut>(
    session: &Session,
    id: &str,
    pending: &[&str],
    delete: F,
) -> Result<()>
where
    T: Describe,
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<()>>,
{
    if retry(&session.retry_config(), delete).await?.is_already_gone() {
        tracing::debug!("{} was already gone", id);
        return Ok(());
    }

    let spec = session
        .wait_spec(ABSENT, session.config().timeouts.delete_secs)
        .with_pending(pending.iter().copied());
    wait_for_state(&spec, &StateProbe::<T>::new(session.api(), id)).await?;
    Ok(())
}

/// A mutation on an object that has to exist: not-found is an error here
pub(crate) fn present<T>(applied: Applied<T>, what: &str) -> Result<T> {
    match applied {
        Applied::Done(value) => Ok(value),
        Applied::AlreadyGone => Err(CloudError::NotFound(what.to_string())),
    }
}
