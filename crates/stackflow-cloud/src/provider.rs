//! Resource provider trait definition

use async_trait::async_trait;
use stackflow_core::Attributes;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a resource provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Retryable (throttling, eventual consistency, network)
    #[error("transient error: {0}")]
    Transient(String),

    /// Fatal to the action
    #[error("permanent error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Resource provider abstraction
///
/// Providers receive fully resolved attributes; references have already been
/// replaced with concrete values by the executor. The attributes returned by
/// `create` must contain a string `id`, which is recorded as the provider id.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Returns the provider name (e.g., "local", "aws")
    fn name(&self) -> &str;

    /// Create a resource and return its real attributes
    async fn create(&self, resource_type: &str, attributes: &Attributes)
    -> ProviderResult<Attributes>;

    /// Update a resource in place and return its real attributes
    async fn update(
        &self,
        resource_type: &str,
        id: &str,
        attributes: &Attributes,
    ) -> ProviderResult<Attributes>;

    /// Destroy a resource
    async fn destroy(&self, resource_type: &str, id: &str) -> ProviderResult<()>;

    /// Read the actual attributes of a resource
    ///
    /// Returns `None` if the resource no longer exists. Providers that cannot
    /// observe remote state echo the recorded attributes.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
        recorded: &Attributes,
    ) -> ProviderResult<Option<Attributes>> {
        let _ = (resource_type, id);
        Ok(Some(recorded.clone()))
    }
}

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Retry without waiting (tests and simulated providers)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before the given retry (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(retry.saturating_sub(1) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor)
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_retry_has_no_delay() {
        let retry = RetryConfig::immediate(5);
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for(4), Duration::ZERO);
    }
}
