//! Filesystem state backend
//!
//! Maps a state location to `<root>/<region>/<bucket>/<key>`. The lock is a
//! sibling `<key>.lock` file created exclusively; the previous snapshot is
//! kept as `<key>.backup`.

use super::{LockInfo, StateBackend, StateLocation, StateSnapshot};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const LOCK_ATTEMPTS: usize = 3;

pub struct FsBackend {
    state_path: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl AsRef<Path>, location: &StateLocation) -> Self {
        Self {
            state_path: root
                .as_ref()
                .join(&location.region)
                .join(&location.bucket)
                .join(&location.key),
        }
    }

    /// Backend for an explicit state file path
    pub fn at_path(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling("lock")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling("backup")
    }

    fn temp_path(&self, token: &str) -> PathBuf {
        self.sibling(&format!("{}.tmp", token))
    }

    fn sibling(&self, extension: &str) -> PathBuf {
        let mut path = OsString::from(self.state_path.as_os_str());
        path.push(".");
        path.push(extension);
        PathBuf::from(path)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if let Some(dir) = self.state_path.parent()
            && !dir.exists()
        {
            fs::create_dir_all(dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        read_lock_file(&self.lock_path()).await
    }

    /// Move a stale lock aside and discard it
    ///
    /// Returns `false` when the lock found at the path is no longer `stale`
    /// (another process took it over first); that lock is put back.
    async fn take_over_stale(&self, stale: &LockInfo) -> Result<bool> {
        let lock_path = self.lock_path();
        let aside = self.sibling(&format!("lock.stale-{}", uuid::Uuid::new_v4()));
        match fs::rename(&lock_path, &aside).await {
            Ok(()) => {}
            // Already moved by another process; retry the exclusive create
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved = read_lock_file(&aside).await?;
        if moved.as_ref() == Some(stale) {
            remove_if_exists(&aside).await?;
            return Ok(true);
        }

        // hard_link never replaces a lock created in the meantime
        match fs::hard_link(&aside, &lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::error!(
                    moved = ?moved.map(|l| l.token),
                    "Lock was replaced while being restored"
                );
            }
            Err(e) => return Err(e.into()),
        }
        remove_if_exists(&aside).await?;
        Ok(false)
    }

    async fn remove_lock_if(&self, token: &str) -> Result<bool> {
        match self.read_lock().await? {
            Some(existing) if existing.token == token => {
                match fs::remove_file(self.lock_path()).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(false),
        }
    }
}

async fn read_lock_file(path: &Path) -> Result<Option<LockInfo>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(info) => Ok(Some(info)),
        Err(_) => {
            // Partially written by a concurrent acquirer, or corrupt
            let acquired_at = fs::metadata(path)
                .await
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            Ok(Some(LockInfo {
                token: String::new(),
                holder: "unknown".to_string(),
                operation: "unknown".to_string(),
                acquired_at,
            }))
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StateBackend for FsBackend {
    fn describe(&self) -> String {
        self.state_path.display().to_string()
    }

    async fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>> {
        self.ensure_state_dir().await?;
        let lock_path = self.lock_path();

        for _ in 0..LOCK_ATTEMPTS {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let content = serde_json::to_string_pretty(lock)?;
                    file.write_all(content.as_bytes()).await?;
                    file.sync_all().await?;
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.read_lock().await? {
                    Some(existing) if existing.is_stale() => {
                        tracing::warn!(
                            holder = %existing.holder,
                            acquired_at = %existing.acquired_at,
                            "Taking over stale lock"
                        );
                        if !self.take_over_stale(&existing).await? {
                            return Ok(Some(self.read_lock().await?.unwrap_or(existing)));
                        }
                    }
                    Some(existing) => return Ok(Some(existing)),
                    // Released between our open and read
                    None => {}
                },
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.read_lock().await?.or_else(|| {
            Some(LockInfo {
                token: String::new(),
                holder: "unknown".to_string(),
                operation: "unknown".to_string(),
                acquired_at: Utc::now(),
            })
        }))
    }

    async fn unlock(&self, token: &str) -> Result<()> {
        if self.remove_lock_if(token).await? {
            Ok(())
        } else {
            Err(CloudError::LockLost(format!(
                "lock {} on {} is no longer held",
                token,
                self.describe()
            )))
        }
    }

    fn unlock_sync(&self, token: &str) {
        let lock_path = self.lock_path();
        let held = std::fs::read_to_string(&lock_path)
            .ok()
            .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok())
            .is_some_and(|info| info.token == token);
        if held {
            let _ = std::fs::remove_file(&lock_path);
        }
    }

    async fn force_unlock(&self, token: &str) -> Result<()> {
        match self.read_lock().await? {
            None => Err(CloudError::State(format!(
                "{} is not locked",
                self.describe()
            ))),
            Some(existing) if existing.token != token => Err(CloudError::State(format!(
                "lock token mismatch: {} is locked with {}",
                self.describe(),
                existing.token
            ))),
            Some(_) => {
                fs::remove_file(self.lock_path()).await?;
                tracing::warn!(token = %token, "Force-unlocked state");
                Ok(())
            }
        }
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn read(&self) -> Result<StateSnapshot> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("State file not found, returning empty state");
                return Ok(StateSnapshot::new());
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = StateSnapshot::from_json(&content)?;
        tracing::debug!(
            serial = snapshot.serial,
            resources = snapshot.resources.len(),
            "Loaded state"
        );
        Ok(snapshot)
    }

    async fn write(
        &self,
        snapshot: &StateSnapshot,
        expected_serial: u64,
        token: &str,
    ) -> Result<()> {
        if !self
            .read_lock()
            .await?
            .is_some_and(|existing| existing.token == token)
        {
            return Err(CloudError::LockLost(format!(
                "lock {} on {} is no longer held",
                token,
                self.describe()
            )));
        }

        let current = self.read().await?;
        if current.serial != expected_serial {
            return Err(CloudError::StaleWrite {
                expected: expected_serial,
                actual: current.serial,
            });
        }

        self.ensure_state_dir().await?;
        let temp = self.temp_path(token);
        fs::write(&temp, snapshot.to_json()?).await?;

        if self.state_path.exists() {
            fs::copy(&self.state_path, self.backup_path()).await?;
        }
        fs::rename(&temp, &self.state_path).await?;
        Ok(())
    }
}
