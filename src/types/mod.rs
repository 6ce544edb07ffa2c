//! Value types shared across the scheduler.

pub mod cost;
pub mod plan;
pub mod task;

pub use cost::{CostRecord, CostReport, Pricing};
pub use plan::{ClusterPlan, ClusterPlanBuilder, ExecutorSettings, QuotaMode, ResolveSettings};
pub use task::{
    FailureKind, ResourceShape, TaskFailure, TaskId, TaskOutcome, TaskStatus, WorkDescriptor,
};
