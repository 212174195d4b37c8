//! State management for provisioned resources
//!
//! The state snapshot records the last-known real-world attributes of every
//! resource. It is only mutated by the holder of the state lock, and every
//! write is conditional on the serial the writer read.

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackflow_core::{Attributes, BackendBlock, Reference};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STATE_FORMAT_VERSION: u32 = 1;

/// Locks older than this are considered abandoned and taken over
pub const STALE_LOCK_AGE_SECS: i64 = 60 * 60;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Addressable location of a state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateLocation {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl StateLocation {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            region: region.into(),
        }
    }

    /// Location used when the stack declares no backend
    pub fn local(stack: &str) -> Self {
        Self::new("local", format!("{}.tfstate", stack), "local")
    }
}

impl From<&BackendBlock> for StateLocation {
    fn from(backend: &BackendBlock) -> Self {
        Self::new(&backend.bucket, &backend.key, &backend.region)
    }
}

impl std::fmt::Display for StateLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.bucket, self.key)
    }
}

/// State of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Provider-specific resource ID
    pub provider_id: String,

    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resolved inputs of the last apply
    #[serde(default)]
    pub inputs: Attributes,

    /// Attributes reported by the provider
    #[serde(default)]
    pub attributes: Attributes,

    /// Resources this resource depended on when it was applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub prevent_destroy: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(provider_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            provider_id: provider_id.into(),
            resource_type: resource_type.into(),
            inputs: Attributes::new(),
            attributes: Attributes::new(),
            dependencies: Vec::new(),
            prevent_destroy: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_inputs(mut self, inputs: Attributes) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A resolved output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub value: serde_json::Value,
    #[serde(default)]
    pub sensitive: bool,
}

/// Versioned record of the last-known real-world state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub format_version: u32,

    /// Incremented on every successful write
    pub serial: u64,

    /// Assigned on the first write; identifies this state's history
    #[serde(default)]
    pub lineage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,

    #[serde(default)]
    pub outputs: BTreeMap<String, OutputState>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: String::new(),
            updated_at: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Resolve a reference against recorded attributes (falling back to inputs)
    pub fn lookup(&self, reference: &Reference) -> Option<serde_json::Value> {
        let resource = self.resources.get(&reference.resource)?;
        reference
            .lookup(&resource.attributes)
            .or_else(|| reference.lookup(&resource.inputs))
            .cloned()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let snapshot: StateSnapshot = serde_json::from_str(content)?;
        if snapshot.format_version > STATE_FORMAT_VERSION {
            return Err(CloudError::State(format!(
                "State file version {} is newer than supported version {}",
                snapshot.format_version, STATE_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// The snapshot that a successful write of `self` will produce
    fn next(&self) -> Self {
        let mut next = self.clone();
        next.serial = self.serial + 1;
        next.updated_at = Some(Utc::now());
        if next.lineage.is_empty() {
            next.lineage = uuid::Uuid::new_v4().to_string();
        }
        next
    }
}

/// Lock information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Opaque token identifying this lock acquisition
    pub token: String,

    /// Host and process holding the lock
    pub holder: String,

    /// Operation being performed (plan, apply, destroy, ...)
    pub operation: String,

    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            token: uuid::Uuid::new_v4().to_string(),
            holder: format!("{}:{}", host, std::process::id()),
            operation: operation.into(),
            acquired_at: Utc::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        Utc::now()
            .signed_duration_since(self.acquired_at)
            .num_seconds()
            >= STALE_LOCK_AGE_SECS
    }
}

/// Storage for a single state snapshot
///
/// Backends provide the locking primitive and conditional writes; the
/// [`StateStore`] layers timeouts and the RAII lock guard on top.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Human-readable location (for messages)
    fn describe(&self) -> String;

    /// Try to acquire the lock once
    ///
    /// Returns `None` when acquired, or the current holder's lock otherwise.
    async fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>>;

    /// Release a lock held with `token`
    async fn unlock(&self, token: &str) -> Result<()>;

    /// Best-effort release used when a lock guard is dropped
    fn unlock_sync(&self, token: &str);

    /// Remove a lock left behind by another process
    async fn force_unlock(&self, token: &str) -> Result<()>;

    /// Current lock, if any
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Read the stored snapshot (empty if none has been written)
    async fn read(&self) -> Result<StateSnapshot>;

    /// Store `snapshot` if the stored serial equals `expected_serial` and
    /// the lock is held with `token`
    async fn write(&self, snapshot: &StateSnapshot, expected_serial: u64, token: &str)
    -> Result<()>;
}

/// State store handle
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: impl StateBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_backend(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    /// Filesystem store rooted at `root`
    pub fn filesystem(root: impl AsRef<Path>, location: &StateLocation) -> Self {
        Self::new(FsBackend::new(root, location))
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Read without locking (for plan and output)
    pub async fn read(&self) -> Result<StateSnapshot> {
        self.backend.read().await
    }

    pub async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.backend.lock_info().await
    }

    pub async fn force_unlock(&self, token: &str) -> Result<()> {
        self.backend.force_unlock(token).await
    }

    /// Acquire the state lock, polling until `timeout` elapses
    #[tracing::instrument(skip(self), fields(state = %self.backend.describe()))]
    pub async fn acquire_lock(&self, operation: &str, timeout: Duration) -> Result<StateLock> {
        let info = LockInfo::new(operation);
        let started = Instant::now();

        loop {
            match self.backend.try_lock(&info).await? {
                None => {
                    tracing::debug!(token = %info.token, "Acquired state lock");
                    return Ok(StateLock {
                        backend: Arc::clone(&self.backend),
                        info,
                        released: false,
                    });
                }
                Some(holder) => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(CloudError::LockTimeout {
                            location: self.backend.describe(),
                            holder: holder.holder,
                            token: holder.token,
                            acquired_at: holder.acquired_at,
                        });
                    }
                    tracing::debug!(holder = %holder.holder, "State is locked, waiting");
                    tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout - elapsed)).await;
                }
            }
        }
    }
}

/// RAII guard for the state lock
///
/// All writes go through the guard. Dropping it without calling
/// [`StateLock::release`] still removes the lock.
pub struct StateLock {
    backend: Arc<dyn StateBackend>,
    info: LockInfo,
    released: bool,
}

impl StateLock {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn token(&self) -> &str {
        &self.info.token
    }

    pub async fn read(&self) -> Result<StateSnapshot> {
        self.backend.read().await
    }

    /// Persist `snapshot`, bumping its serial on success
    ///
    /// Fails with `StaleWrite` if the stored serial moved since `snapshot` was read.
    pub async fn write(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        let next = snapshot.next();
        self.backend
            .write(&next, snapshot.serial, &self.info.token)
            .await?;
        tracing::debug!(
            serial = next.serial,
            resources = next.resources.len(),
            "Saved state"
        );
        *snapshot = next;
        Ok(())
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.backend.unlock(&self.info.token).await?;
            tracing::debug!("Released state lock");
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            self.backend.unlock_sync(&self.info.token);
        }
    }
}
