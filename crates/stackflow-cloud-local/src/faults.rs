//! Fault injection rules
//!
//! Rules are written as `type:operation:kind[:count]`, comma separated, e.g.
//! `aws_iam_role:create:permanent,aws_vpc:*:transient:2`.

use crate::error::{LocalError, Result};
use stackflow_cloud::ProviderError;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Provider operation a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Destroy,
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Destroy => write!(f, "destroy"),
            Operation::Read => write!(f, "read"),
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "destroy" => Ok(Operation::Destroy),
            "read" => Ok(Operation::Read),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Every matching call fails
    Permanent,
    /// The next `remaining` matching calls fail with a retryable error
    Transient { remaining: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRule {
    pub resource_type: String,
    /// `None` matches every operation
    pub operation: Option<Operation>,
    pub kind: FaultKind,
}

impl FaultRule {
    pub fn permanent(resource_type: impl Into<String>, operation: Option<Operation>) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation,
            kind: FaultKind::Permanent,
        }
    }

    pub fn transient(
        resource_type: impl Into<String>,
        operation: Option<Operation>,
        times: u32,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation,
            kind: FaultKind::Transient { remaining: times },
        }
    }

    pub fn parse(rule: &str) -> Result<Self> {
        let invalid = |reason: &str| LocalError::InvalidFaultRule {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = rule.trim().split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(invalid("expected type:operation:kind[:count]"));
        }
        if parts[0].is_empty() {
            return Err(invalid("resource type is empty"));
        }

        let operation = match parts[1] {
            "*" => None,
            op => Some(op.parse::<Operation>().map_err(|e| invalid(&e))?),
        };

        let kind = match (parts[2], parts.get(3)) {
            ("permanent", None) => FaultKind::Permanent,
            ("transient", None) => FaultKind::Transient { remaining: 1 },
            ("transient", Some(count)) => FaultKind::Transient {
                remaining: count
                    .parse()
                    .map_err(|_| invalid("count must be a non-negative integer"))?,
            },
            ("permanent", Some(_)) => return Err(invalid("permanent faults take no count")),
            _ => return Err(invalid("kind must be 'permanent' or 'transient'")),
        };

        Ok(Self {
            resource_type: parts[0].to_string(),
            operation,
            kind,
        })
    }

    /// Parse a comma separated list of rules
    pub fn parse_list(rules: &str) -> Result<Vec<Self>> {
        rules
            .split(',')
            .filter(|r| !r.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    fn matches(&self, resource_type: &str, operation: Operation) -> bool {
        self.resource_type == resource_type && self.operation.is_none_or(|op| op == operation)
    }
}

/// Applies fault rules to provider calls
#[derive(Debug, Default)]
pub struct FaultInjector {
    rules: Mutex<Vec<FaultRule>>,
}

impl FaultInjector {
    pub fn new(rules: Vec<FaultRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    pub fn add(&self, rule: FaultRule) {
        self.rules().push(rule);
    }

    pub fn clear(&self) {
        self.rules().clear();
    }

    /// Fail the call if a rule matches
    pub fn check(
        &self,
        resource_type: &str,
        operation: Operation,
    ) -> std::result::Result<(), ProviderError> {
        let mut rules = self.rules();
        for rule in rules.iter_mut() {
            if !rule.matches(resource_type, operation) {
                continue;
            }
            match &mut rule.kind {
                FaultKind::Permanent => {
                    return Err(ProviderError::Permanent(
                        LocalError::Injected(format!("{} {}", operation, resource_type))
                            .to_string(),
                    ));
                }
                FaultKind::Transient { remaining } if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(ProviderError::Transient(
                        LocalError::Injected(format!("{} {} (throttled)", operation, resource_type))
                            .to_string(),
                    ));
                }
                FaultKind::Transient { .. } => {}
            }
        }
        Ok(())
    }

    fn rules(&self) -> std::sync::MutexGuard<'_, Vec<FaultRule>> {
        self.rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
