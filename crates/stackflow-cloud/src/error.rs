//! Engine error types

use chrono::{DateTime, Utc};
use stackflow_core::StackError;
use thiserror::Error;

/// Errors raised while planning, applying or managing state
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Lock timeout: state {location} is locked by {holder} since {acquired_at} (token {token})")]
    LockTimeout {
        location: String,
        holder: String,
        token: String,
        acquired_at: DateTime<Utc>,
    },

    #[error("Stale write: expected state serial {expected}, found {actual}")]
    StaleWrite { expected: u64, actual: u64 },

    #[error("Lock lost: {0}")]
    LockLost(String),

    #[error(
        "Stale plan: computed against serial {plan_serial} (lineage '{plan_lineage}'), \
         state is at serial {state_serial} (lineage '{state_lineage}')"
    )]
    StalePlan {
        plan_serial: u64,
        plan_lineage: String,
        state_serial: u64,
        state_lineage: String,
    },

    #[error("Resource '{0}' has prevent-destroy set and cannot be destroyed")]
    PreventDestroy(String),

    #[error("Provider error on '{resource}': {message}")]
    Provider { resource: String, message: String },

    #[error("State file error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] StackError),
}

impl CloudError {
    /// Whether re-running the whole plan/apply cycle can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::LockTimeout { .. } | CloudError::StaleWrite { .. } | CloudError::StalePlan { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CloudError::StaleWrite { expected: 1, actual: 2 }.is_retryable());
        assert!(!CloudError::PreventDestroy("bucket".to_string()).is_retryable());
        assert!(
            !CloudError::Core(StackError::CyclicDependency {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            })
            .is_retryable()
        );
    }
}
