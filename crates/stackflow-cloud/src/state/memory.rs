//! In-process state backend

use super::{LockInfo, StateBackend, StateSnapshot};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    snapshot: StateSnapshot,
    lock: Option<LockInfo>,
    writes: u64,
}

/// Shared in-memory backend
///
/// Clones share the same snapshot and lock, so several stores (or engines)
/// built from clones contend exactly like separate processes on one file.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with a snapshot
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        let backend = Self::default();
        backend.state().snapshot = snapshot;
        backend
    }

    /// Number of successful writes
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        // Every mutation is a single assignment, so a poisoned guard is still consistent
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn try_lock(&self, lock: &LockInfo) -> Result<Option<LockInfo>> {
        let mut state = self.state();
        match &state.lock {
            Some(existing) if !existing.is_stale() => Ok(Some(existing.clone())),
            Some(existing) => {
                tracing::warn!(holder = %existing.holder, "Removing stale lock");
                state.lock = Some(lock.clone());
                Ok(None)
            }
            None => {
                state.lock = Some(lock.clone());
                Ok(None)
            }
        }
    }

    async fn unlock(&self, token: &str) -> Result<()> {
        let mut state = self.state();
        match &state.lock {
            Some(existing) if existing.token == token => {
                state.lock = None;
                Ok(())
            }
            _ => Err(CloudError::LockLost(format!(
                "lock {} is no longer held",
                token
            ))),
        }
    }

    fn unlock_sync(&self, token: &str) {
        let mut state = self.state();
        if state.lock.as_ref().is_some_and(|l| l.token == token) {
            state.lock = None;
        }
    }

    async fn force_unlock(&self, token: &str) -> Result<()> {
        let mut state = self.state();
        match &state.lock {
            Some(existing) if existing.token == token => {
                state.lock = None;
                Ok(())
            }
            Some(existing) => Err(CloudError::State(format!(
                "lock token mismatch: state is locked with {}",
                existing.token
            ))),
            None => Err(CloudError::State("state is not locked".to_string())),
        }
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.state().lock.clone())
    }

    async fn read(&self) -> Result<StateSnapshot> {
        Ok(self.state().snapshot.clone())
    }

    async fn write(
        &self,
        snapshot: &StateSnapshot,
        expected_serial: u64,
        token: &str,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.lock.as_ref().is_some_and(|l| l.token == token) {
            return Err(CloudError::LockLost(format!(
                "lock {} is no longer held",
                token
            )));
        }
        if state.snapshot.serial != expected_serial {
            return Err(CloudError::StaleWrite {
                expected: expected_serial,
                actual: state.snapshot.serial,
            });
        }
        state.snapshot = snapshot.clone();
        state.writes += 1;
        Ok(())
    }
}
