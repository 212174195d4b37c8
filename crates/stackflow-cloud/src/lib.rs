//! StackFlow Cloud Engine
//!
//! This crate turns a synthesized stack into real infrastructure: it diffs
//! the desired document against recorded state, executes the resulting plan
//! through a provider, and persists state under an exclusive lock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  StackFlow CLI                   │
//! │            (stack plan/apply/destroy)            │
//! └─────────────────┬───────────────────────────────┘
//!                   │ SynthDocument
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────┐  ┌──────────────┐             │
//! │  │   Planner    │─▶│   Executor   │             │
//! │  │ (diff→Plan)  │  │  (JoinSet)   │             │
//! │  └──────┬───────┘  └──────┬───────┘             │
//! │  ┌──────▼─────────────────▼───────┐             │
//! │  │   State Store (lock, serial)   │             │
//! │  └────────────────────────────────┘             │
//! └─────────────────────────┬───────────────────────┘
//!                           │ trait ResourceProvider
//!                   ┌───────▼───────┐
//!                   │    provider   │
//!                   │ (local, ...)  │
//!                   └───────────────┘
//! ```

pub mod action;
pub mod engine;
pub mod error;
pub mod executor;
pub mod planner;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{
    Action, ActionOutcome, ActionStatus, ActionType, ApplyReport, Plan, PlanSummary, SkipReason,
};
pub use engine::{DriftReport, DriftedResource, Engine, EngineOptions};
pub use error::{CloudError, Result};
pub use executor::{Executor, ExecutorOptions};
pub use planner::diff;
pub use provider::{ProviderError, ProviderResult, ResourceProvider, RetryConfig};
pub use state::{
    FsBackend, LockInfo, MemoryBackend, OutputState, ResourceState, StateBackend, StateLocation,
    StateLock, StateSnapshot, StateStore,
};
