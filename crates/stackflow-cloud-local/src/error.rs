//! Local provider error types

use stackflow_cloud::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Invalid fault rule '{rule}': {reason}")]
    InvalidFaultRule { rule: String, reason: String },

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LocalError>;

impl From<LocalError> for ProviderError {
    fn from(err: LocalError) -> Self {
        match err {
            // The store file may be contended by another process
            LocalError::IoError(e) => ProviderError::Transient(e.to_string()),
            other => ProviderError::Permanent(other.to_string()),
        }
    }
}
