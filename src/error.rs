//! Error types for fleet sessions.
//!
//! Provides [`FleetError`], the caller-facing error taxonomy. Each variant
//! carries the task identifier (where one applies) so that a failure surfaced
//! by [`Session::value`](crate::session::Session::value) can be traced back to
//! the task that produced it.
//!
//! # Classification
//!
//! | Variant              | Category        | Retryable |
//! |----------------------|-----------------|-----------|
//! | `TransientInfra`     | `transient`     | yes       |
//! | `FatalLaunch`        | `fatal_launch`  | no        |
//! | `TaskRuntime`        | `task_runtime`  | no        |
//! | `Timeout`            | `timeout`       | no        |
//! | `WorkerVanished`     | `vanished`      | no        |
//! | `QuotaConfiguration` | `configuration` | no        |
//!
//! Every other variant is a usage or storage error and is reported under the
//! `usage` or `store` categories.

use std::time::Duration;

use crate::store::backend::StorageError;
use crate::types::task::{FailureKind, TaskFailure, TaskId, TaskStatus};

/// Errors that can occur during fleet operations.
///
/// Task-scoped failures (`TransientInfra`, `FatalLaunch`, `TaskRuntime`,
/// `Timeout`, `WorkerVanished`) are recorded on the task and surfaced only
/// when the caller inspects that task. They never abort the session.
///
/// # Examples
///
/// ```
/// use fleet_futures::{FleetError, TaskId};
///
/// let err = FleetError::UnknownTask {
///     task_id: TaskId::from("missing"),
/// };
/// assert_eq!(err.classification(), "usage");
/// assert!(err.to_string().contains("missing"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Infrastructure error that stayed transient after all retries.
    #[error("transient infrastructure error for task {task_id}: {message}")]
    TransientInfra {
        /// The affected task.
        task_id: TaskId,
        /// Description of the last observed error.
        message: String,
    },

    /// Launch was rejected permanently (malformed descriptor, denied resource).
    #[error("fatal launch error for task {task_id}: {message}")]
    FatalLaunch {
        /// The affected task.
        task_id: TaskId,
        /// Description of the rejection.
        message: String,
    },

    /// The work unit itself raised an error on the worker.
    #[error("task {task_id} failed: {message}")]
    TaskRuntime {
        /// The affected task.
        task_id: TaskId,
        /// Error reported by the worker.
        message: String,
    },

    /// The task did not reach a terminal state within its timeout.
    #[error("task {task_id} timed out after {}ms", after.as_millis())]
    Timeout {
        /// The affected task.
        task_id: TaskId,
        /// The configured bound that elapsed.
        after: Duration,
    },

    /// The worker disappeared without a terminal report.
    #[error("worker for task {task_id} vanished: {message}")]
    WorkerVanished {
        /// The affected task.
        task_id: TaskId,
        /// Description of what was observed.
        message: String,
    },

    /// The cluster plan's quota is unusable (zero, or smaller than any shape).
    #[error("quota configuration error: {message}")]
    QuotaConfiguration {
        /// Description of the invalid setting.
        message: String,
    },

    /// A task's requested shape can never fit the resource quota.
    #[error("task {task_id} requests more resources than the quota allows: {message}")]
    ShapeExceedsQuota {
        /// The rejected task.
        task_id: TaskId,
        /// Description of the mismatch.
        message: String,
    },

    /// No task with this identifier is registered.
    #[error("unknown task: {task_id}")]
    UnknownTask {
        /// The identifier that was looked up.
        task_id: TaskId,
    },

    /// Attempted an invalid state machine transition.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: TaskId,
        /// The current status.
        from: TaskStatus,
        /// The rejected target status.
        to: TaskStatus,
    },

    /// The task was cancelled before it produced a value.
    #[error("task {task_id} was cancelled")]
    Cancelled {
        /// The cancelled task.
        task_id: TaskId,
    },

    /// The operation requires a terminal task.
    #[error("task {task_id} is not resolved (status: {status})")]
    NotResolved {
        /// The task.
        task_id: TaskId,
        /// Its current, non-terminal status.
        status: TaskStatus,
    },

    /// The session has been shut down and accepts no more work.
    #[error("session is closed")]
    SessionClosed,

    /// Result store failure.
    #[error("result store error: {0}")]
    Store(#[from] StorageError),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    /// Returns the stable category string for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use fleet_futures::{FleetError, TaskId};
    ///
    /// let err = FleetError::Timeout {
    ///     task_id: TaskId::from("t1"),
    ///     after: Duration::from_secs(5),
    /// };
    /// assert_eq!(err.classification(), "timeout");
    /// ```
    pub fn classification(&self) -> &'static str {
        match self {
            Self::TransientInfra { .. } => "transient",
            Self::FatalLaunch { .. } => "fatal_launch",
            Self::TaskRuntime { .. } => "task_runtime",
            Self::Timeout { .. } => "timeout",
            Self::WorkerVanished { .. } => "vanished",
            Self::QuotaConfiguration { .. } => "configuration",
            Self::Store(_) => "store",
            Self::ShapeExceedsQuota { .. }
            | Self::UnknownTask { .. }
            | Self::InvalidTransition { .. }
            | Self::Cancelled { .. }
            | Self::NotResolved { .. }
            | Self::SessionClosed
            | Self::Config(_)
            | Self::Serialization(_) => "usage",
        }
    }

    /// Returns `true` if the error is a transient infrastructure error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientInfra { .. })
    }

    /// Rebuilds the caller-facing error recorded for a failed task.
    ///
    /// The failure kind chooses the variant so the original classification
    /// survives the round trip through the result store.
    pub fn from_failure(task_id: &TaskId, failure: &TaskFailure) -> Self {
        let task_id = task_id.clone();
        let message = failure.message.clone();
        match failure.kind {
            FailureKind::Runtime => Self::TaskRuntime { task_id, message },
            FailureKind::FatalLaunch => Self::FatalLaunch { task_id, message },
            FailureKind::TransientInfra => Self::TransientInfra { task_id, message },
            FailureKind::Vanished => Self::WorkerVanished { task_id, message },
            FailureKind::Timeout => Self::Timeout {
                task_id,
                after: Duration::from_millis(failure.timeout_ms.unwrap_or_default()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = FleetError::UnknownTask {
            task_id: TaskId::from("abc"),
        };
        assert_eq!(err.to_string(), "unknown task: abc");

        let err = FleetError::Timeout {
            task_id: TaskId::from("def"),
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "task def timed out after 1500ms");

        let err = FleetError::QuotaConfiguration {
            message: "quota must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn only_transient_infra_is_retryable() {
        let id = TaskId::from("t");
        assert!(FleetError::TransientInfra {
            task_id: id.clone(),
            message: "throttled".to_string(),
        }
        .is_retryable());
        assert!(!FleetError::FatalLaunch {
            task_id: id.clone(),
            message: "denied".to_string(),
        }
        .is_retryable());
        assert!(!FleetError::Cancelled { task_id: id }.is_retryable());
    }

    #[test]
    fn from_failure_preserves_classification() {
        let id = TaskId::from("t-9");
        let cases = [
            (FailureKind::Runtime, "task_runtime"),
            (FailureKind::FatalLaunch, "fatal_launch"),
            (FailureKind::TransientInfra, "transient"),
            (FailureKind::Vanished, "vanished"),
            (FailureKind::Timeout, "timeout"),
        ];
        for (kind, expected) in cases {
            let failure = TaskFailure::new(kind, "boom");
            let err = FleetError::from_failure(&id, &failure);
            assert_eq!(err.classification(), expected, "kind {kind:?}");
        }
    }

    #[test]
    fn timeout_failure_carries_bound() {
        let failure = TaskFailure::timeout(Duration::from_millis(250));
        match FleetError::from_failure(&TaskId::from("t"), &failure) {
            FleetError::Timeout { after, .. } => assert_eq!(after, Duration::from_millis(250)),
            other => panic!("expected Timeout, got: {other}"),
        }
    }
}
