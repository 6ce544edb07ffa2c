//! Quota-limited wave scheduling of deferred computations onto ephemeral
//! cloud workers.
//!
//! A caller submits work units and receives a [`FleetFuture`] per unit. The
//! [`Session`] admits queued units in first-in-first-out order as quota
//! slots free up, launches one single-use worker per unit through a
//! [`RemoteExecutor`](executor::RemoteExecutor), supervises it, stores its
//! result, and accounts for its cost. Resolving a future blocks until its
//! unit is terminal and returns the stored value or the recorded failure.
//!
//! # Overview
//!
//! A task is `pending` until admitted, `running` once its worker is
//! launched, and then `completed`, `failed` or `cancelled`. Terminal states
//! are final. Admission happens in waves: every time a slot frees, as many
//! queue-head tasks as the quota allows are admitted together.
//!
//! # Module Organization
//!
//! - [`types`] - Value types (task, plan, cost)
//! - [`domain`] - The registry-owned [`TaskRecord`]
//! - [`registry`] - Task registry and state transitions
//! - [`queue`] - Pure functional wave queue
//! - [`executor`] - Remote executor seam, retries, and the local fleet
//! - [`store`] - Write-once result store over pluggable object backends
//! - [`cost`] - Cost accounting
//! - [`provision`] - Image and infrastructure seams
//! - [`session`] - The scheduler and its futures
//! - [`config`] - TOML and environment configuration
//! - [`error`] - Error taxonomy

pub mod config;
pub mod cost;
pub mod domain;
pub mod error;
pub mod executor;
#[cfg(feature = "logging")]
pub mod logging;
pub mod provision;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for ergonomic access
pub use config::FleetConfig;
pub use domain::TaskRecord;
pub use error::FleetError;
pub use session::{
    FleetFuture, FutureBackend, MapPolicy, Session, SessionBuilder, ShutdownMode, SubmitOptions,
};
pub use types::{
    ClusterPlan, ClusterPlanBuilder, CostRecord, CostReport, ExecutorSettings, FailureKind,
    Pricing, QuotaMode, ResolveSettings, ResourceShape, TaskFailure, TaskId, TaskOutcome,
    TaskStatus, WorkDescriptor,
};
