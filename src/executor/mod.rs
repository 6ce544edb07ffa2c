//! Remote executor seam: launch, poll and cancel one unit of work.
//!
//! A [`RemoteExecutor`] owns no scheduling policy. It is handed one admitted
//! task at a time by the session and reports what it observes on the remote
//! side. Everything above this trait is provider-agnostic.
//!
//! # Implementations
//!
//! - [`local::LocalExecutor`]: in-process simulated fleet with fault
//!   injection, used by tests and local development.
//! - [`ecs::EcsExecutor`] (feature `ecs`): AWS ECS/Fargate tasks.
//! - [`retry::RetryingExecutor`]: decorator adding bounded backoff for
//!   transient errors.
//!
//! # Error Classification
//!
//! Implementations must classify every failure as either
//! [`ExecutorError::Transient`] (throttling, network blips, capacity that may
//! free up) or [`ExecutorError::Fatal`] (malformed descriptor, permanent
//! denial). Only transient errors are retried.

#[cfg(feature = "ecs")]
pub mod ecs;
pub mod local;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provision::InfraHandles;
use crate::types::task::{ResourceShape, TaskId, WorkDescriptor};

/// Errors reported by a [`RemoteExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Retryable failure (throttling, network blip, capacity shortage).
    #[error("transient executor error: {message}")]
    Transient {
        /// Provider detail.
        message: String,
    },

    /// Non-retryable failure (malformed descriptor, permanent denial).
    #[error("fatal executor error: {message}")]
    Fatal {
        /// Provider detail.
        message: String,
    },

    /// A transient error persisted through every retry attempt.
    #[error("transient error persisted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// The last error observed.
        last: String,
    },
}

impl ExecutorError {
    /// Returns `true` if the error may succeed when retried immediately.
    ///
    /// [`RetriesExhausted`](Self::RetriesExhausted) is not transient at this
    /// layer; the session may still requeue the task.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns `true` if the error is permanent.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Shorthand for a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}

/// Opaque reference to one launched worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Provider identifier of the worker (container ARN, local id).
    pub worker_id: String,
    /// The task the worker is running.
    pub task_id: TaskId,
    /// When the launch was acknowledged.
    pub launched_at: DateTime<Utc>,
}

impl WorkerHandle {
    /// Creates a handle acknowledged now.
    pub fn new(worker_id: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id,
            launched_at: Utc::now(),
        }
    }
}

/// What the executor observed about a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Still working.
    Running,
    /// Finished and its outcome is in the result store.
    Succeeded {
        /// Key of the stored outcome.
        result_ref: String,
        /// Billed runtime reported by the provider, if known.
        runtime: Option<Duration>,
    },
    /// The work raised an error.
    Failed {
        /// Error reported by the worker.
        message: String,
        /// Billed runtime reported by the provider, if known.
        runtime: Option<Duration>,
    },
    /// The worker is gone without a terminal report.
    Vanished,
}

impl PollStatus {
    /// Returns `true` for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }
}

/// Everything an executor needs to start one task.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// The task being launched.
    pub task_id: TaskId,
    /// The opaque work unit.
    pub descriptor: WorkDescriptor,
    /// Requested compute shape.
    pub shape: ResourceShape,
    /// Worker image reference.
    pub image: String,
    /// Network and identity handles from the provisioner.
    pub infra: InfraHandles,
}

impl LaunchRequest {
    /// Creates a request with empty infrastructure handles.
    pub fn new(
        task_id: TaskId,
        descriptor: WorkDescriptor,
        shape: ResourceShape,
        image: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            descriptor,
            shape,
            image: image.into(),
            infra: InfraHandles::default(),
        }
    }

    /// Sets the infrastructure handles.
    pub fn with_infra(mut self, infra: InfraHandles) -> Self {
        self.infra = infra;
        self
    }
}

/// Mechanism for running work on the remote fleet.
///
/// Implementations must be `Send + Sync`: the session polls many workers
/// concurrently from independent monitor tasks.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Starts one worker for the request.
    async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError>;

    /// Reports the current state of a worker.
    async fn poll(&self, worker: &WorkerHandle) -> Result<PollStatus, ExecutorError>;

    /// Requests that the worker stop. Best-effort.
    async fn cancel(&self, worker: &WorkerHandle) -> Result<(), ExecutorError>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for std::sync::Arc<T> {
    async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError> {
        (**self).launch(request).await
    }

    async fn poll(&self, worker: &WorkerHandle) -> Result<PollStatus, ExecutorError> {
        (**self).poll(worker).await
    }

    async fn cancel(&self, worker: &WorkerHandle) -> Result<(), ExecutorError> {
        (**self).cancel(worker).await
    }
}
