//! Planner
//!
//! Diffs the synthesized document against the recorded state. Desired inputs
//! are compared with the inputs recorded by the last apply; references are
//! resolved against *predicted* post-apply values so that a change upstream
//! ripples into its dependents.

use crate::action::{Action, ActionType, Plan};
use crate::error::{CloudError, Result};
use crate::state::{OutputState, StateSnapshot};
use serde_json::Value;
use stackflow_core::{Attributes, AttrValue, Reference, StackError, SynthDocument, SynthOutput};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument};

/// Values a resource is expected to expose once the plan is applied
struct Predicted {
    known: Attributes,
    /// Every attribute is known (unchanged resource)
    complete: bool,
}

impl Predicted {
    fn lookup(&self, reference: &Reference) -> std::result::Result<Option<Value>, StackError> {
        match reference.lookup(&self.known) {
            Some(value) => Ok(Some(value.clone())),
            None if self.complete => Err(StackError::UnresolvedReference(reference.to_string())),
            None => Ok(None),
        }
    }
}

/// Resolution of one desired resource's inputs
struct ResolvedInputs {
    known: Attributes,
    unknown: BTreeSet<String>,
}

fn resolve_inputs(
    attributes: &BTreeMap<String, AttrValue>,
    predicted: &HashMap<String, Predicted>,
) -> Result<ResolvedInputs> {
    // Unresolvable references on unchanged resources are hard errors
    let error = RefCell::new(None);
    let lookup = |reference: &Reference| -> Option<Value> {
        match predicted.get(&reference.resource)?.lookup(reference) {
            Ok(value) => value,
            Err(e) => {
                error.borrow_mut().get_or_insert(e);
                None
            }
        }
    };

    let mut resolved = ResolvedInputs {
        known: Attributes::new(),
        unknown: BTreeSet::new(),
    };
    for (name, value) in attributes {
        match value.resolve(&lookup) {
            Ok(v) => {
                resolved.known.insert(name.clone(), v);
            }
            Err(_) => {
                resolved.unknown.insert(name.clone());
            }
        }
    }

    match error.into_inner() {
        Some(e) => Err(e.into()),
        None => Ok(resolved),
    }
}

fn changed_keys(desired: &ResolvedInputs, recorded: &Attributes) -> Vec<String> {
    let mut keys: BTreeSet<&String> = desired.unknown.iter().collect();
    for (name, value) in &desired.known {
        if recorded.get(name) != Some(value) {
            keys.insert(name);
        }
    }
    for name in recorded.keys() {
        if !desired.known.contains_key(name) && !desired.unknown.contains(name) {
            keys.insert(name);
        }
    }
    keys.into_iter().cloned().collect()
}

/// Compute the plan that moves `current` to `desired`
#[instrument(skip_all, fields(stack = %desired.stack, serial = current.serial))]
pub fn diff(desired: &SynthDocument, current: &StateSnapshot) -> Result<Plan> {
    let mut actions: Vec<Action> = Vec::new();
    let mut predicted: HashMap<String, Predicted> = HashMap::new();
    // Resource -> non-NoOp action ids its dependents must wait for
    let mut barrier: HashMap<String, Vec<String>> = HashMap::new();
    let mut metadata_updates = Vec::new();

    for resource in &desired.resources {
        let mut waits_for = BTreeSet::new();
        for dependency in &resource.depends_on {
            if let Some(ids) = barrier.get(dependency) {
                waits_for.extend(ids.iter().cloned());
            }
        }

        let inputs = resolve_inputs(&resource.attributes, &predicted)?;
        let recorded = current.get(&resource.id);

        let action_type = match recorded {
            None => ActionType::Create,
            Some(state) if state.resource_type != resource.resource_type => {
                if state.prevent_destroy || resource.prevent_destroy {
                    return Err(CloudError::PreventDestroy(resource.id.clone()));
                }
                let mut destroy = Action::new(ActionType::Destroy, &resource.id, &state.resource_type);
                destroy.description = format!(
                    "replace {} ({} -> {})",
                    resource.id, state.resource_type, resource.resource_type
                );
                waits_for.insert(destroy.id.clone());
                actions.push(destroy);
                ActionType::Create
            }
            Some(state) if changed_keys(&inputs, &state.inputs).is_empty() => ActionType::NoOp,
            Some(_) => ActionType::Update,
        };

        let mut action = Action::new(action_type, &resource.id, &resource.resource_type);
        action.config = resource.attributes.clone();
        action.resource_dependencies = resource.depends_on.clone();
        action.prevent_destroy = resource.prevent_destroy;

        let prediction = match (action_type, recorded) {
            (ActionType::NoOp, Some(state)) => {
                let mut known = state.inputs.clone();
                known.extend(state.attributes.clone());
                Predicted {
                    known,
                    complete: true,
                }
            }
            (ActionType::Update, Some(state)) => {
                action.changes = changed_keys(&inputs, &state.inputs);
                let mut known = state.attributes.clone();
                for name in &inputs.unknown {
                    known.remove(name);
                }
                known.extend(inputs.known.clone());
                Predicted {
                    known,
                    complete: false,
                }
            }
            _ => Predicted {
                known: inputs.known.clone(),
                complete: false,
            },
        };
        predicted.insert(resource.id.clone(), prediction);

        if action_type == ActionType::NoOp
            && let Some(state) = recorded
            && (state.dependencies != resource.depends_on
                || state.prevent_destroy != resource.prevent_destroy)
        {
            debug!(resource = %resource.id, "Dependencies or lifecycle changed");
            metadata_updates.push(resource.id.clone());
        }

        if action.is_change() {
            action.depends_on = waits_for.into_iter().collect();
            barrier.insert(resource.id.clone(), vec![action.id.clone()]);
        } else {
            // NoOp is elided; dependents wait for whatever it would have waited for
            barrier.insert(resource.id.clone(), waits_for.into_iter().collect());
        }

        debug!(resource = %resource.id, action = %action_type, "Planned resource");
        actions.push(action);
    }

    let removals = plan_removals(desired, current, &actions)?;
    actions.extend(removals);

    let outputs_changed = outputs_changed(&desired.outputs, current, &predicted);
    Ok(Plan::new(
        &desired.stack,
        &current.lineage,
        current.serial,
        actions,
        desired.outputs.clone(),
        outputs_changed,
    )
    .with_metadata_updates(metadata_updates))
}

/// Destroy actions for recorded resources absent from the desired document,
/// in reverse topological order of their recorded dependencies
fn plan_removals(
    desired: &SynthDocument,
    current: &StateSnapshot,
    planned: &[Action],
) -> Result<Vec<Action>> {
    let desired_ids: HashSet<&str> = desired.resources.iter().map(|r| r.id.as_str()).collect();
    let removed: BTreeSet<&str> = current
        .resources
        .keys()
        .map(String::as_str)
        .filter(|id| !desired_ids.contains(id))
        .collect();

    if let Some(id) = removed
        .iter()
        .find(|id| current.get(id).is_some_and(|r| r.prevent_destroy))
    {
        return Err(CloudError::PreventDestroy(id.to_string()));
    }

    // Dependencies before dependents, ties by identifier
    let mut order: Vec<&str> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    fn visit<'a>(
        id: &'a str,
        current: &'a StateSnapshot,
        removed: &BTreeSet<&'a str>,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<&'a str>,
    ) {
        if !visited.insert(id) {
            return;
        }
        if let Some(state) = current.get(id) {
            for dependency in &state.dependencies {
                if let Some(dep) = removed.get(dependency.as_str()) {
                    visit(*dep, current, removed, visited, order);
                }
            }
        }
        order.push(id);
    }
    for id in &removed {
        visit(*id, current, &removed, &mut visited, &mut order);
    }

    let mut destroys = Vec::new();
    for id in order.into_iter().rev() {
        let Some(state) = current.get(id) else {
            continue;
        };
        let mut action = Action::new(ActionType::Destroy, id, &state.resource_type);

        let mut waits_for = BTreeSet::new();
        for (other_id, other) in &current.resources {
            if !other.dependencies.iter().any(|d| d == id) {
                continue;
            }
            if removed.contains(other_id.as_str()) {
                waits_for.insert(Action::action_id(ActionType::Destroy, other_id));
            } else if let Some(dependent) = planned
                .iter()
                .rev()
                .find(|a| a.resource_id == *other_id && a.is_change())
            {
                waits_for.insert(dependent.id.clone());
            }
        }
        action.depends_on = waits_for.into_iter().collect();
        destroys.push(action);
    }
    Ok(destroys)
}

fn outputs_changed(
    declared: &BTreeMap<String, SynthOutput>,
    current: &StateSnapshot,
    predicted: &HashMap<String, Predicted>,
) -> bool {
    if declared.len() != current.outputs.len() {
        return true;
    }
    declared.iter().any(|(name, output)| {
        let lookup = |reference: &Reference| {
            predicted
                .get(&reference.resource)
                .and_then(|p| reference.lookup(&p.known).cloned())
        };
        match (output.value.resolve(&lookup), current.outputs.get(name)) {
            (Ok(value), Some(recorded)) => {
                recorded
                    != &OutputState {
                        value,
                        sensitive: output.sensitive,
                    }
            }
            _ => true,
        }
    })
}
