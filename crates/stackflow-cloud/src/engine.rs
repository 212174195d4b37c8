//! Engine
//!
//! Orchestrates plan, apply, destroy and refresh against one state store and
//! one provider. Every mutating operation holds the state lock from the read
//! of the snapshot to the final write.

use crate::action::{ActionType, ApplyReport, Plan};
use crate::error::{CloudError, Result};
use crate::executor::{DEFAULT_PARALLELISM, Executor, ExecutorOptions};
use crate::planner::diff;
use crate::provider::{ProviderError, ResourceProvider, RetryConfig};
use crate::state::{OutputState, StateLock, StateSnapshot, StateStore};
use chrono::Utc;
use serde::Serialize;
use stackflow_core::{Attributes, SynthDocument};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long to wait for the state lock
    pub lock_timeout: Duration,
    pub parallelism: usize,
    pub retry: RetryConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryConfig::default(),
        }
    }
}

/// A recorded resource whose real attributes differ from state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftedResource {
    pub id: String,
    pub changed_keys: Vec<String>,
}

/// Result of comparing recorded state with the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DriftReport {
    /// Resources that no longer exist (dropped from state)
    pub removed: Vec<String>,
    pub changed: Vec<DriftedResource>,
    pub unchanged: Vec<String>,
    pub state_serial: u64,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.removed.is_empty() || !self.changed.is_empty()
    }
}

pub struct Engine {
    store: StateStore,
    provider: Arc<dyn ResourceProvider>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(store: StateStore, provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            store,
            provider,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Compute a plan without taking the lock
    #[instrument(skip_all, fields(stack = %desired.stack))]
    pub async fn plan(&self, desired: &SynthDocument) -> Result<Plan> {
        let snapshot = self.store.read().await?;
        diff(desired, &snapshot)
    }

    /// Plan that removes every recorded resource
    pub async fn plan_destroy(&self, stack: &str) -> Result<Plan> {
        self.plan(&SynthDocument::empty(stack)).await
    }

    /// Lock, plan against the locked snapshot and apply
    #[instrument(skip_all, fields(stack = %desired.stack))]
    pub async fn apply(
        &self,
        desired: &SynthDocument,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let lock = self
            .store
            .acquire_lock("apply", self.options.lock_timeout)
            .await?;
        let snapshot = lock.read().await?;
        let plan = diff(desired, &snapshot)?;
        info!(summary = %plan.summary(), "Planned changes");
        self.run(&plan, lock, snapshot, cancel).await
    }

    /// Apply a previously computed plan
    ///
    /// Fails with `StalePlan` if the state moved since the plan was made.
    #[instrument(skip_all, fields(stack = %plan.stack, serial = plan.serial))]
    pub async fn apply_plan(&self, plan: &Plan, cancel: &CancellationToken) -> Result<ApplyReport> {
        let lock = self
            .store
            .acquire_lock("apply", self.options.lock_timeout)
            .await?;
        let snapshot = lock.read().await?;
        if snapshot.serial != plan.serial || snapshot.lineage != plan.lineage {
            return Err(CloudError::StalePlan {
                plan_serial: plan.serial,
                plan_lineage: plan.lineage.clone(),
                state_serial: snapshot.serial,
                state_lineage: snapshot.lineage.clone(),
            });
        }
        self.run(plan, lock, snapshot, cancel).await
    }

    /// Destroy every resource recorded in state
    #[instrument(skip(self, cancel))]
    pub async fn destroy(&self, stack: &str, cancel: &CancellationToken) -> Result<ApplyReport> {
        let lock = self
            .store
            .acquire_lock("destroy", self.options.lock_timeout)
            .await?;
        let snapshot = lock.read().await?;
        let plan = diff(&SynthDocument::empty(stack), &snapshot)?;
        info!(summary = %plan.summary(), "Planned destruction");
        self.run(&plan, lock, snapshot, cancel).await
    }

    /// Recorded outputs (no lock)
    pub async fn outputs(&self) -> Result<BTreeMap<String, OutputState>> {
        Ok(self.store.read().await?.outputs)
    }

    /// Re-read every recorded resource from the provider and record drift
    ///
    /// Vanished resources are dropped from state; drifted attributes are
    /// recorded, including inputs, so the next plan converges them.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<DriftReport> {
        let lock = self
            .store
            .acquire_lock("refresh", self.options.lock_timeout)
            .await?;
        let mut snapshot = lock.read().await?;
        let mut report = DriftReport::default();

        let ids: Vec<String> = snapshot.resources.keys().cloned().collect();
        for id in ids {
            let Some(state) = snapshot.resources.get_mut(&id) else {
                continue;
            };
            let actual = self
                .read_with_retry(&state.resource_type, &state.provider_id, &state.attributes)
                .await
                .map_err(|e| CloudError::Provider {
                    resource: id.clone(),
                    message: e.to_string(),
                })?;

            match actual {
                None => {
                    warn!(resource = %id, "Resource no longer exists");
                    snapshot.resources.remove(&id);
                    report.removed.push(id);
                }
                Some(actual) => {
                    let changed_keys = drifted_keys(&state.attributes, &actual);
                    if changed_keys.is_empty() {
                        report.unchanged.push(id);
                    } else {
                        warn!(resource = %id, keys = ?changed_keys, "Resource drifted");
                        // Drifted inputs make the next plan converge them back
                        for key in &changed_keys {
                            if state.inputs.contains_key(key) {
                                match actual.get(key) {
                                    Some(value) => state.inputs.insert(key.clone(), value.clone()),
                                    None => state.inputs.remove(key),
                                };
                            }
                        }
                        state.attributes = actual;
                        state.updated_at = Utc::now();
                        report.changed.push(DriftedResource { id, changed_keys });
                    }
                }
            }
        }

        if report.has_drift() {
            lock.write(&mut snapshot).await?;
        }
        report.state_serial = snapshot.serial;
        lock.release().await?;
        Ok(report)
    }

    async fn read_with_retry(
        &self,
        resource_type: &str,
        id: &str,
        recorded: &Attributes,
    ) -> std::result::Result<Option<Attributes>, ProviderError> {
        let retry = &self.options.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.read(resource_type, id, recorded).await {
                Err(ProviderError::Transient(message)) if attempt < retry.max_attempts.max(1) => {
                    warn!(id, attempt, error = %message, "Transient provider error, retrying");
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                }
                other => return other,
            }
        }
    }

    async fn run(
        &self,
        plan: &Plan,
        lock: StateLock,
        mut snapshot: StateSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        if !plan.has_changes {
            info!("No changes. Infrastructure is up-to-date");
            lock.release().await?;
            return Ok(ApplyReport {
                state_serial: snapshot.serial,
                outputs: snapshot.outputs,
                ..Default::default()
            });
        }

        if record_metadata(plan, &mut snapshot) {
            lock.write(&mut snapshot).await?;
        }

        let executor = Executor::new(
            Arc::clone(&self.provider),
            ExecutorOptions {
                parallelism: self.options.parallelism,
                retry: self.options.retry.clone(),
            },
        );
        let mut report = executor.execute(plan, &lock, &mut snapshot, cancel).await?;

        let outputs = resolve_outputs(plan, &report, &snapshot);
        if outputs != snapshot.outputs {
            snapshot.outputs = outputs;
            lock.write(&mut snapshot).await?;
        }

        report.outputs = snapshot.outputs.clone();
        report.state_serial = snapshot.serial;
        lock.release().await?;

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Apply finished"
        );
        Ok(report)
    }
}

/// Record dependency and lifecycle changes of unchanged resources
///
/// Returns whether the snapshot changed.
fn record_metadata(plan: &Plan, snapshot: &mut StateSnapshot) -> bool {
    let mut changed = false;
    for id in &plan.metadata_updates {
        let Some(action) = plan
            .action_for(id)
            .filter(|a| a.action_type == ActionType::NoOp)
        else {
            continue;
        };
        let Some(state) = snapshot.resources.get_mut(id) else {
            continue;
        };
        info!(resource = %id, "Recording dependencies and lifecycle");
        state.dependencies = action.resource_dependencies.clone();
        state.prevent_destroy = action.prevent_destroy;
        state.updated_at = Utc::now();
        changed = true;
    }
    changed
}

/// Outputs after a run
///
/// An output referencing a resource that did not apply keeps its previous value.
fn resolve_outputs(
    plan: &Plan,
    report: &ApplyReport,
    snapshot: &StateSnapshot,
) -> BTreeMap<String, OutputState> {
    let not_applied: HashSet<&str> = report
        .failed
        .iter()
        .chain(&report.skipped)
        .map(|o| o.resource_id.as_str())
        .collect();

    let mut outputs = BTreeMap::new();
    for (name, output) in &plan.outputs {
        let blocked = output
            .value
            .references()
            .iter()
            .any(|r| not_applied.contains(r.resource.as_str()));
        if blocked {
            if let Some(previous) = snapshot.outputs.get(name) {
                outputs.insert(name.clone(), previous.clone());
            }
            continue;
        }
        match output.value.resolve(&|r| snapshot.lookup(r)) {
            Ok(value) => {
                outputs.insert(
                    name.clone(),
                    OutputState {
                        value,
                        sensitive: output.sensitive,
                    },
                );
            }
            Err(reference) => {
                warn!(output = %name, reference = %reference, "Output could not be resolved");
            }
        }
    }
    outputs
}

fn drifted_keys(recorded: &Attributes, actual: &Attributes) -> Vec<String> {
    let keys: BTreeSet<&String> = recorded.keys().chain(actual.keys()).collect();
    keys.into_iter()
        .filter(|k| recorded.get(*k) != actual.get(*k))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_drifted_keys() {
        let mut recorded = Attributes::new();
        recorded.insert("id".to_string(), json!("vpc-1"));
        recorded.insert("cidr_block".to_string(), json!("10.0.0.0/16"));
        let mut actual = recorded.clone();
        actual.insert("cidr_block".to_string(), json!("10.1.0.0/16"));
        actual.insert("owner".to_string(), json!("ops"));

        assert_eq!(drifted_keys(&recorded, &actual), vec!["cidr_block", "owner"]);
        assert!(drifted_keys(&recorded, &recorded).is_empty());
    }

    #[test]
    fn test_record_metadata_updates_unchanged_resources() {
        use crate::action::Action;
        use crate::state::ResourceState;

        let mut snapshot = StateSnapshot::new();
        snapshot
            .resources
            .insert("a".to_string(), ResourceState::new("a-1", "aws_s3_bucket"));
        snapshot.resources.insert(
            "b".to_string(),
            ResourceState::new("b-1", "aws_s3_bucket")
                .with_dependencies(vec!["a".to_string()]),
        );

        let mut keep = Action::new(ActionType::NoOp, "a", "aws_s3_bucket");
        keep.prevent_destroy = true;
        let mut detach = Action::new(ActionType::NoOp, "b", "aws_s3_bucket");
        detach.resource_dependencies = Vec::new();
        let plan = Plan::new("demo", "lineage", 0, vec![keep, detach], BTreeMap::new(), false)
            .with_metadata_updates(vec!["a".to_string(), "b".to_string()]);

        assert!(plan.has_changes);
        assert!(record_metadata(&plan, &mut snapshot));
        assert!(snapshot.resources["a"].prevent_destroy);
        assert!(snapshot.resources["b"].dependencies.is_empty());

        let untouched = Plan::new("demo", "lineage", 0, Vec::new(), BTreeMap::new(), false);
        assert!(!record_metadata(&untouched, &mut snapshot));
    }

    #[test]
    fn test_default_options() {
        let options = EngineOptions::default();
        assert_eq!(options.lock_timeout, Duration::from_secs(10));
        assert_eq!(options.parallelism, 4);
    }
}
