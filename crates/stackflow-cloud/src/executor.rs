//! Executor
//!
//! Applies a plan against a resource provider. Actions whose dependencies are
//! all `Applied` are started on a bounded set of tasks; an action depending on
//! a failed or skipped action is `Skipped`. The scheduler loop is the only
//! writer of the snapshot and persists it after every applied action.

use crate::action::{
    Action, ActionOutcome, ActionStatus, ActionType, ApplyReport, Plan, SkipReason,
};
use crate::error::{CloudError, Result};
use crate::provider::{ProviderError, ProviderResult, ResourceProvider, RetryConfig};
use crate::state::{ResourceState, StateLock, StateSnapshot};
use chrono::Utc;
use stackflow_core::Attributes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_PARALLELISM: usize = 4;

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum number of provider calls in flight
    pub parallelism: usize,
    pub retry: RetryConfig,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryConfig::default(),
        }
    }
}

/// Provider call prepared from an action and the current snapshot
#[derive(Debug, Clone)]
enum Call {
    Create(Attributes),
    Update { id: String, inputs: Attributes },
    Destroy { id: String },
}

struct Finished {
    index: usize,
    call: Call,
    attempts: u32,
    result: ProviderResult<Option<Attributes>>,
}

pub struct Executor {
    provider: Arc<dyn ResourceProvider>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(provider: Arc<dyn ResourceProvider>, options: ExecutorOptions) -> Self {
        Self { provider, options }
    }

    /// Apply every change in `plan`, persisting progress through `lock`
    ///
    /// Cancellation stops scheduling; in-flight actions still reach a
    /// terminal state and are recorded before this returns.
    #[instrument(skip_all, fields(stack = %plan.stack, provider = %self.provider.name()))]
    pub async fn execute(
        &self,
        plan: &Plan,
        lock: &StateLock,
        snapshot: &mut StateSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let started = Instant::now();
        let actions: Vec<&Action> = plan.actions.iter().filter(|a| a.is_change()).collect();
        let index: HashMap<&str, usize> = actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut status = vec![ActionStatus::Pending; actions.len()];
        let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; actions.len()];
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let parallelism = self.options.parallelism.max(1);
        let mut cancel_logged = false;
        let mut write_error: Option<CloudError> = None;

        loop {
            propagate_skips(&actions, &index, &mut status, &mut outcomes);
            let mut progressed = false;

            if cancel.is_cancelled() || write_error.is_some() {
                for (i, action) in actions.iter().enumerate() {
                    if status[i] == ActionStatus::Pending {
                        status[i] = ActionStatus::Skipped;
                        outcomes[i] = Some(outcome(action, ActionStatus::Skipped, 0)
                            .skipped(SkipReason::Cancelled));
                    }
                }
            } else {
                for (i, action) in actions.iter().enumerate() {
                    if tasks.len() >= parallelism {
                        break;
                    }
                    if status[i] != ActionStatus::Pending || !is_ready(action, &index, &status) {
                        continue;
                    }
                    match prepare(action, snapshot) {
                        Ok(Some(call)) => {
                            status[i] = ActionStatus::InProgress;
                            info!(action = %action.id, "Applying action");
                            let provider = Arc::clone(&self.provider);
                            let retry = self.options.retry.clone();
                            let action_id = action.id.clone();
                            let resource_type = action.resource_type.clone();
                            tasks.spawn(async move {
                                let (result, attempts) =
                                    invoke(provider.as_ref(), &action_id, &resource_type, &call, &retry)
                                        .await;
                                Finished {
                                    index: i,
                                    call,
                                    attempts,
                                    result,
                                }
                            });
                        }
                        Ok(None) => {
                            info!(action = %action.id, "Resource already absent");
                            status[i] = ActionStatus::Applied;
                            outcomes[i] = Some(outcome(action, ActionStatus::Applied, 0));
                            progressed = true;
                        }
                        Err(message) => {
                            warn!(action = %action.id, error = %message, "Action failed");
                            status[i] = ActionStatus::Failed;
                            outcomes[i] = Some(outcome(action, ActionStatus::Failed, 0).failed(message));
                            progressed = true;
                        }
                    }
                }
            }

            if tasks.is_empty() {
                // An action settled without a provider call may unblock others
                if progressed {
                    continue;
                }
                break;
            }

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = cancel.cancelled(), if !cancel_logged => {
                    cancel_logged = true;
                    warn!(in_flight = tasks.len(), "Cancellation requested, waiting for in-flight actions");
                    continue;
                }
            };

            let finished = match joined {
                Some(Ok(finished)) => finished,
                Some(Err(e)) => {
                    error!(error = %e, "Action task terminated unexpectedly");
                    continue;
                }
                None => continue,
            };

            let action = actions[finished.index];
            match finished.result {
                Ok(returned) => match record(action, finished.call, returned, snapshot) {
                    Ok(()) => {
                        info!(action = %action.id, attempts = finished.attempts, "Action applied");
                        status[finished.index] = ActionStatus::Applied;
                        outcomes[finished.index] =
                            Some(outcome(action, ActionStatus::Applied, finished.attempts));
                        if write_error.is_none()
                            && let Err(e) = lock.write(snapshot).await
                        {
                            error!(action = %action.id, error = %e, "Failed to persist state");
                            write_error = Some(e);
                        }
                    }
                    Err(message) => {
                        warn!(action = %action.id, error = %message, "Action failed");
                        status[finished.index] = ActionStatus::Failed;
                        outcomes[finished.index] = Some(
                            outcome(action, ActionStatus::Failed, finished.attempts).failed(message),
                        );
                    }
                },
                Err(e) => {
                    warn!(action = %action.id, attempts = finished.attempts, error = %e, "Action failed");
                    status[finished.index] = ActionStatus::Failed;
                    outcomes[finished.index] = Some(
                        outcome(action, ActionStatus::Failed, finished.attempts).failed(e.to_string()),
                    );
                }
            }
        }

        if let Some(e) = write_error {
            return Err(e);
        }

        let mut report = ApplyReport::default();
        for (i, action) in actions.iter().enumerate() {
            let result = match outcomes[i].take() {
                Some(result) => result,
                None if status[i] == ActionStatus::InProgress => {
                    outcome(action, ActionStatus::Failed, 0)
                        .failed("action task terminated unexpectedly".to_string())
                }
                None => {
                    let blocked_by = action
                        .depends_on
                        .iter()
                        .find(|dep| {
                            index
                                .get(dep.as_str())
                                .is_some_and(|&j| status[j] != ActionStatus::Applied)
                        })
                        .cloned()
                        .unwrap_or_default();
                    outcome(action, ActionStatus::Skipped, 0)
                        .skipped(SkipReason::DependencyNotApplied(blocked_by))
                }
            };
            if result.status == ActionStatus::Skipped {
                info!(action = %action.id, reason = ?result.skip_reason, "Action skipped");
            }
            report.record(result);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.state_serial = snapshot.serial;
        Ok(report)
    }
}

fn outcome(action: &Action, status: ActionStatus, attempts: u32) -> ActionOutcome {
    ActionOutcome {
        action_id: action.id.clone(),
        action_type: action.action_type,
        resource_id: action.resource_id.clone(),
        status,
        attempts,
        error: None,
        skip_reason: None,
    }
}

impl ActionOutcome {
    fn failed(mut self, message: String) -> Self {
        self.error = Some(message);
        self
    }

    fn skipped(mut self, reason: SkipReason) -> Self {
        self.skip_reason = Some(reason);
        self
    }
}

/// Dependencies outside the change set (elided NoOps) count as applied
fn is_ready(action: &Action, index: &HashMap<&str, usize>, status: &[ActionStatus]) -> bool {
    action.depends_on.iter().all(|dep| {
        index
            .get(dep.as_str())
            .is_none_or(|&j| status[j] == ActionStatus::Applied)
    })
}

fn propagate_skips(
    actions: &[&Action],
    index: &HashMap<&str, usize>,
    status: &mut [ActionStatus],
    outcomes: &mut [Option<ActionOutcome>],
) {
    loop {
        let mut changed = false;
        for (i, action) in actions.iter().enumerate() {
            if status[i] != ActionStatus::Pending {
                continue;
            }
            let blocked_by = action.depends_on.iter().find(|dep| {
                index.get(dep.as_str()).is_some_and(|&j| {
                    matches!(status[j], ActionStatus::Failed | ActionStatus::Skipped)
                })
            });
            if let Some(dep) = blocked_by {
                status[i] = ActionStatus::Skipped;
                outcomes[i] = Some(
                    outcome(action, ActionStatus::Skipped, 0)
                        .skipped(SkipReason::DependencyNotApplied(dep.clone())),
                );
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Resolve an action against the current snapshot
///
/// `Ok(None)` means there is nothing to do (destroying an absent resource).
fn prepare(
    action: &Action,
    snapshot: &StateSnapshot,
) -> std::result::Result<Option<Call>, String> {
    let recorded = snapshot.get(&action.resource_id);

    match action.action_type {
        ActionType::Destroy => Ok(recorded.map(|state| Call::Destroy {
            id: state.provider_id.clone(),
        })),
        ActionType::Create | ActionType::Update => {
            let mut inputs = Attributes::new();
            for (name, value) in &action.config {
                let resolved = value
                    .resolve(&|reference| snapshot.lookup(reference))
                    .map_err(|reference| {
                        format!("unresolved reference {} in attribute '{}'", reference, name)
                    })?;
                inputs.insert(name.clone(), resolved);
            }

            if action.action_type == ActionType::Create {
                return Ok(Some(Call::Create(inputs)));
            }
            let state = recorded.ok_or_else(|| {
                format!("resource '{}' is not recorded in state", action.resource_id)
            })?;
            Ok(Some(Call::Update {
                id: state.provider_id.clone(),
                inputs,
            }))
        }
        ActionType::NoOp => Ok(None),
    }
}

async fn invoke(
    provider: &dyn ResourceProvider,
    action_id: &str,
    resource_type: &str,
    call: &Call,
    retry: &RetryConfig,
) -> (ProviderResult<Option<Attributes>>, u32) {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match call {
            Call::Create(inputs) => provider.create(resource_type, inputs).await.map(Some),
            Call::Update { id, inputs } => {
                provider.update(resource_type, id, inputs).await.map(Some)
            }
            Call::Destroy { id } => provider.destroy(resource_type, id).await.map(|()| None),
        };

        match result {
            Err(ProviderError::Transient(message)) if attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    action = action_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            other => return (other, attempt),
        }
    }
}

/// Record a successful provider call into the snapshot
fn record(
    action: &Action,
    call: Call,
    returned: Option<Attributes>,
    snapshot: &mut StateSnapshot,
) -> std::result::Result<(), String> {
    let now = Utc::now();
    let (inputs, previous_id) = match call {
        Call::Destroy { .. } => {
            snapshot.resources.remove(&action.resource_id);
            return Ok(());
        }
        Call::Create(inputs) => (inputs, None),
        Call::Update { id, inputs } => (inputs, Some(id)),
    };

    let attributes = returned.unwrap_or_default();
    let provider_id = attributes
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or(previous_id)
        .ok_or_else(|| format!("provider returned no id for '{}'", action.resource_id))?;

    let created_at = snapshot
        .get(&action.resource_id)
        .filter(|_| action.action_type == ActionType::Update)
        .map(|state| state.created_at)
        .unwrap_or(now);

    let mut state = ResourceState::new(provider_id, &action.resource_type)
        .with_inputs(inputs)
        .with_attributes(attributes)
        .with_dependencies(action.resource_dependencies.clone());
    state.prevent_destroy = action.prevent_destroy;
    state.created_at = created_at;
    state.updated_at = now;
    snapshot.resources.insert(action.resource_id.clone(), state);
    Ok(())
}
