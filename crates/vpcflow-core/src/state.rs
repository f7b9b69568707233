//! Recorded state for provisioned resources
//!
//! Adapters checkpoint a resource after every applied change, so a failure
//! halfway through an update leaves the earlier changes on record. The
//! file-backed [`StateManager`] keeps `.vpcflow/state.json`.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".vpcflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";

/// All recorded resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by type:id
    pub resources: HashMap<String, ResourceState>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: HashMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a resource
    pub fn set_resource(&mut self, state: ResourceState) {
        self.resources.insert(state.key(), state);
        self.updated_at = Utc::now();
    }

    /// Remove a resource
    pub fn remove_resource(&mut self, key: &str) -> Option<ResourceState> {
        let result = self.resources.remove(key);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_resource(&self, key: &str) -> Option<&ResourceState> {
        self.resources.get(key)
    }

    /// Resources of one type
    pub fn by_type(&self, resource_type: &str) -> Vec<&ResourceState> {
        self.resources
            .values()
            .filter(|r| r.resource_type == resource_type)
            .collect()
    }
}

/// Recorded state of a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-assigned ID
    pub id: String,

    /// Resource type (e.g. "vpc", "route_table")
    pub resource_type: String,

    pub status: ResourceStatus,

    /// Typed attributes, serialized
    pub attributes: serde_json::Value,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            status: ResourceStatus::Creating,
            attributes: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_attributes<T: Serialize>(mut self, attributes: &T) -> Result<Self> {
        self.attributes = serde_json::to_value(attributes)?;
        Ok(self)
    }

    /// Attributes deserialized back into their typed form
    pub fn attributes<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.attributes.clone())?)
    }

    /// type:id
    pub fn key(&self) -> String {
        state_key(&self.resource_type, &self.id)
    }
}

pub fn state_key(resource_type: &str, id: &str) -> String {
    format!("{}:{}", resource_type, id)
}

/// Status of a recorded resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Id assigned, not yet converged
    Creating,
    /// Converged to the desired attributes
    Available,
    /// Some changes of an update applied
    Updating,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Available => write!(f, "available"),
            ResourceStatus::Updating => write!(f, "updating"),
        }
    }
}

/// Where adapters persist progress
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn save(&self, state: &ResourceState) -> Result<()>;

    async fn remove(&self, resource_type: &str, id: &str) -> Result<()>;
}

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    state: Mutex<GlobalState>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource_type: &str, id: &str) -> Option<ResourceState> {
        self.lock()
            .get_resource(&state_key(resource_type, id))
            .cloned()
    }

    pub fn snapshot(&self) -> GlobalState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GlobalState> {
        // A poisoned lock still holds a consistent map; every write is a single insert/remove
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Checkpoint for MemoryCheckpoint {
    async fn save(&self, state: &ResourceState) -> Result<()> {
        self.lock().set_resource(state.clone());
        Ok(())
    }

    async fn remove(&self, resource_type: &str, id: &str) -> Result<()> {
        self.lock().remove_resource(&state_key(resource_type, id));
        Ok(())
    }
}

/// State manager for reading/writing state files
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,

    /// Serializes load-modify-save cycles
    write_lock: tokio::sync::Mutex<()>,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load the current state
    pub async fn load(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the state, keeping the previous file as a backup
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let backup = self.backup_path();

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
            tracing::debug!("Created state backup");
        }

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }
}

#[async_trait]
impl Checkpoint for StateManager {
    async fn save(&self, resource: &ResourceState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        state.set_resource(resource.clone());
        StateManager::save(self, &state).await
    }

    async fn remove(&self, resource_type: &str, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await?;
        if state
            .remove_resource(&state_key(resource_type, id))
            .is_some()
        {
            StateManager::save(self, &state).await?;
        }
        Ok(())
    }
}
