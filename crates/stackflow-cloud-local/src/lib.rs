//! Local provider for StackFlow
//!
//! This crate implements the `ResourceProvider` trait without talking to a
//! real cloud. Resources are recorded in a JSON file next to the state, which
//! makes it possible to run the full plan/apply/destroy cycle offline.
//!
//! # Features
//!
//! - Fabricated `id`, `arn` and (for load balancers) `dns_name`
//! - Fault injection by resource type and operation
//! - Out-of-band edits for exercising `refresh`
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud_local::LocalProvider;
//!
//! let provider = LocalProvider::from_env(".stackflow/resources.json", "local-1")?;
//! ```

pub mod error;
pub mod faults;
pub mod provider;
pub mod store;

pub use error::{LocalError, Result};
pub use faults::{FaultInjector, FaultKind, FaultRule, Operation};
pub use provider::{DEFAULT_REGION, FAULTS_ENV, LATENCY_ENV, LocalProvider};
pub use store::{RemoteResource, ResourceStore};
