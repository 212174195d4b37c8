//! Action types for resource management

use crate::error::Result;
use crate::state::OutputState;
use serde::{Deserialize, Serialize};
use stackflow_core::{AttrValue, SynthOutput};
use std::collections::BTreeMap;

/// Plan document format version
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// Represents a planned action for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier for the action (e.g., "create.vpc")
    pub id: String,

    /// Type of action to perform
    pub action_type: ActionType,

    /// Logical identifier of the resource
    pub resource_id: String,

    /// Resource type (e.g., "aws_vpc")
    pub resource_type: String,

    /// Description of the action
    pub description: String,

    /// Inputs to apply; references stay as placeholders until execution
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, AttrValue>,

    /// Attributes whose value changes (updates only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,

    /// Actions that must be applied before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Resources this resource depends on, recorded into state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_dependencies: Vec<String>,

    #[serde(default)]
    pub prevent_destroy: bool,
}

impl Action {
    pub fn action_id(action_type: ActionType, resource_id: &str) -> String {
        format!("{}.{}", action_type, resource_id)
    }

    pub fn new(
        action_type: ActionType,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        let resource_id = resource_id.into();
        let resource_type = resource_type.into();
        Self {
            id: Self::action_id(action_type, &resource_id),
            description: format!("{} {} ({})", action_type, resource_id, resource_type),
            action_type,
            resource_id,
            resource_type,
            config: BTreeMap::new(),
            changes: Vec::new(),
            depends_on: Vec::new(),
            resource_dependencies: Vec::new(),
            prevent_destroy: false,
        }
    }

    pub fn is_change(&self) -> bool {
        self.action_type != ActionType::NoOp
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource
    Update,
    /// Destroy a resource
    Destroy,
    /// No changes needed
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Destroy => write!(f, "destroy"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Plan containing all actions to be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub format_version: u32,

    /// Stack name
    pub stack: String,

    /// Lineage of the state the plan was computed against
    pub lineage: String,

    /// Serial of the state the plan was computed against
    pub serial: u64,

    /// Create/Update in topological order, then Destroy in reverse topological order
    pub actions: Vec<Action>,

    /// Output declarations, resolved after apply
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, SynthOutput>,

    /// Whether recorded outputs differ from the declared ones
    #[serde(default)]
    pub outputs_changed: bool,

    /// Unchanged resources whose dependencies or lifecycle differ from
    /// state; recorded without a provider call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_updates: Vec<String>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(
        stack: impl Into<String>,
        lineage: impl Into<String>,
        serial: u64,
        actions: Vec<Action>,
        outputs: BTreeMap<String, SynthOutput>,
        outputs_changed: bool,
    ) -> Self {
        let has_changes = outputs_changed || actions.iter().any(Action::is_change);
        Self {
            format_version: PLAN_FORMAT_VERSION,
            stack: stack.into(),
            lineage: lineage.into(),
            serial,
            actions,
            outputs,
            outputs_changed,
            metadata_updates: Vec::new(),
            has_changes,
        }
    }

    pub fn with_metadata_updates(mut self, resource_ids: Vec<String>) -> Self {
        self.has_changes |= !resource_ids.is_empty();
        self.metadata_updates = resource_ids;
        self
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Action planned for a resource (a replacement yields its Create)
    pub fn action_for(&self, resource_id: &str) -> Option<&Action> {
        self.actions
            .iter()
            .rev()
            .find(|a| a.resource_id == resource_id)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            destroy: self.actions_by_type(ActionType::Destroy).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub destroy: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to destroy, {} unchanged",
            self.create, self.update, self.destroy, self.no_change
        )
    }
}

/// Terminal (or pending) status of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Applied,
    Failed,
    Skipped,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::InProgress => write!(f, "in-progress"),
            ActionStatus::Applied => write!(f, "applied"),
            ActionStatus::Failed => write!(f, "failed"),
            ActionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Why an action was not attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An action this one depends on did not reach `Applied`
    DependencyNotApplied(String),
    /// Cancellation was requested before the action started
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DependencyNotApplied(id) => write!(f, "dependency {} was not applied", id),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a single action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub action_type: ActionType,
    pub resource_id: String,
    pub status: ActionStatus,

    /// Provider calls made (retries included)
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Result of applying a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Successfully applied actions
    pub applied: Vec<ActionOutcome>,

    /// Failed actions
    pub failed: Vec<ActionOutcome>,

    /// Actions never attempted
    pub skipped: Vec<ActionOutcome>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    /// State serial after the run
    pub state_serial: u64,

    /// Outputs resolved after the run
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputState>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn record(&mut self, outcome: ActionOutcome) {
        match outcome.status {
            ActionStatus::Applied => self.applied.push(outcome),
            ActionStatus::Failed => self.failed.push(outcome),
            _ => self.skipped.push(outcome),
        }
    }

    /// Status of the action planned for a resource
    ///
    /// A replacement has two actions; its Create decides the status. Use
    /// [`status_of_action`](Self::status_of_action) for the destroy half.
    pub fn status_of(&self, resource_id: &str) -> Option<ActionStatus> {
        let mut outcomes = self.outcomes().filter(|o| o.resource_id == resource_id);
        let first = outcomes.next()?;
        if first.action_type != ActionType::Destroy {
            return Some(first.status);
        }
        Some(
            outcomes
                .find(|o| o.action_type != ActionType::Destroy)
                .unwrap_or(first)
                .status,
        )
    }

    pub fn status_of_action(&self, action_id: &str) -> Option<ActionStatus> {
        self.outcomes()
            .find(|o| o.action_id == action_id)
            .map(|o| o.status)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.applied
            .iter()
            .chain(self.failed.iter())
            .chain(self.skipped.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        let create = Action::new(ActionType::Create, "vpc", "aws_vpc");
        let mut update = Action::new(ActionType::Update, "subnet1", "aws_subnet");
        update.depends_on.push(create.id.clone());
        let noop = Action::new(ActionType::NoOp, "igw", "aws_internet_gateway");
        let destroy = Action::new(ActionType::Destroy, "subnet2", "aws_subnet");
        Plan::new(
            "test",
            "lineage",
            3,
            vec![create, update, noop, destroy],
            BTreeMap::new(),
            false,
        )
    }

    #[test]
    fn test_action_ids() {
        assert_eq!(Action::action_id(ActionType::Create, "vpc"), "create.vpc");
        assert_eq!(Action::action_id(ActionType::NoOp, "vpc"), "no-op.vpc");
    }

    #[test]
    fn test_plan_summary() {
        let plan = sample_plan();
        assert!(plan.has_changes);
        assert_eq!(
            plan.summary().to_string(),
            "1 to create, 1 to update, 1 to destroy, 1 unchanged"
        );
    }

    #[test]
    fn test_noop_only_plan_has_no_changes() {
        let plan = Plan::new(
            "test",
            "",
            0,
            vec![Action::new(ActionType::NoOp, "vpc", "aws_vpc")],
            BTreeMap::new(),
            false,
        );
        assert!(!plan.has_changes);
    }

    #[test]
    fn test_plan_json_round_trip() {
        let plan = sample_plan();
        let parsed = Plan::from_json(&plan.to_json().unwrap()).unwrap();
        assert_eq!(parsed, plan);
        assert_eq!(
            parsed.action("update.subnet1").unwrap().depends_on,
            vec!["create.vpc"]
        );
    }

    #[test]
    fn test_report_status_of() {
        let mut report = ApplyReport::default();
        report.record(ActionOutcome {
            action_id: "create.role".to_string(),
            action_type: ActionType::Create,
            resource_id: "role".to_string(),
            status: ActionStatus::Failed,
            attempts: 1,
            error: Some("denied".to_string()),
            skip_reason: None,
        });
        assert_eq!(report.status_of("role"), Some(ActionStatus::Failed));
        assert_eq!(report.status_of("lambda"), None);
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_status_of_replacement() {
        let outcome = |action_type: ActionType, status: ActionStatus| ActionOutcome {
            action_id: Action::action_id(action_type, "vpc"),
            action_type,
            resource_id: "vpc".to_string(),
            status,
            attempts: 1,
            error: None,
            skip_reason: None,
        };

        let mut report = ApplyReport::default();
        report.record(outcome(ActionType::Destroy, ActionStatus::Applied));
        report.record(outcome(ActionType::Create, ActionStatus::Failed));
        assert_eq!(report.status_of("vpc"), Some(ActionStatus::Failed));
        assert_eq!(report.status_of_action("destroy.vpc"), Some(ActionStatus::Applied));
        assert_eq!(report.status_of_action("create.vpc"), Some(ActionStatus::Failed));

        let mut report = ApplyReport::default();
        report.record(outcome(ActionType::Create, ActionStatus::Applied));
        report.record(outcome(ActionType::Destroy, ActionStatus::Failed));
        assert_eq!(report.status_of("vpc"), Some(ActionStatus::Applied));

        let mut report = ApplyReport::default();
        report.record(outcome(ActionType::Destroy, ActionStatus::Applied));
        assert_eq!(report.status_of("vpc"), Some(ActionStatus::Applied));
    }
}
