//! Client handle passed into every adapter call

use crate::api::NetworkApi;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vpcflow_config::EngineConfig;
use vpcflow_core::{
    Checkpoint, CloudError, ConvergenceSpec, ResourceState, ResourceStatus, Result, RetryConfig,
    StateManager,
};

/// Provider connection, progress store and engine settings.
///
/// Built once by the orchestrator; adapters hold no state of their own.
#[derive(Clone)]
pub struct Session {
    api: Arc<dyn NetworkApi>,
    checkpoint: Arc<dyn Checkpoint>,
    config: EngineConfig,
}

impl Session {
    pub fn new(api: Arc<dyn NetworkApi>, checkpoint: Arc<dyn Checkpoint>) -> Self {
        Self {
            api,
            checkpoint,
            config: EngineConfig::default(),
        }
    }

    /// Session for a project directory: `EngineConfig::load()` and a
    /// [`StateManager`] rooted at `project_root`
    pub fn for_project(api: Arc<dyn NetworkApi>, project_root: impl AsRef<Path>) -> Result<Self> {
        let config =
            EngineConfig::load().map_err(|e| CloudError::InvalidConfig(e.to_string()))?;
        let checkpoint = Arc::new(StateManager::new(project_root));
        Ok(Self::new(api, checkpoint).with_config(config))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn api(&self) -> &dyn NetworkApi {
        self.api.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.config.retry.budget(), self.config.retry.backoff())
    }

    /// Wait spec using the configured poll interval
    pub fn wait_spec(&self, target: &str, timeout_secs: u64) -> ConvergenceSpec {
        ConvergenceSpec::new(target)
            .with_timeout(Duration::from_secs(timeout_secs))
            .with_poll_interval(self.config.poll_interval())
    }

    /// Checkpoints the current attributes of a resource
    pub async fn record<T: Serialize>(
        &self,
        resource_type: &str,
        id: &str,
        status: ResourceStatus,
        attributes: &T,
    ) -> Result<()> {
        let state = ResourceState::new(id, resource_type)
            .with_status(status)
            .with_attributes(attributes)?;
        tracing::debug!("Checkpoint {} {} ({})", resource_type, id, status);
        self.checkpoint.save(&state).await
    }

    pub async fn forget(&self, resource_type: &str, id: &str) -> Result<()> {
        tracing::debug!("Forget {} {}", resource_type, id);
        self.checkpoint.remove(resource_type, id).await
    }
}
