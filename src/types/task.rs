//! Core task value types.
//!
//! This module defines the values that describe a unit of remote work:
//! [`TaskId`], the [`TaskStatus`] state machine, the requested
//! [`ResourceShape`], the opaque [`WorkDescriptor`], and the persisted
//! [`TaskOutcome`] / [`TaskFailure`] pair.
//!
//! # Serialization
//!
//! Enums serialize as `snake_case` strings. [`TaskId`] is transparent and
//! serializes as a plain string so it can be embedded in object keys.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::FleetError;

/// Opaque, session-unique task identifier.
///
/// Generated identifiers are `UUIDv4` strings. Callers may also supply their
/// own identifier through
/// [`SubmitOptions::with_id`](crate::session::SubmitOptions::with_id); the
/// registry treats a repeated identifier as an idempotent re-registration.
///
/// # Examples
///
/// ```
/// use fleet_futures::TaskId;
///
/// let a = TaskId::new();
/// let b = TaskId::new();
/// assert_ne!(a, b);
///
/// let named = TaskId::from("render-frame-7");
/// assert_eq!(named.as_str(), "render-frame-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh `UUIDv4` identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Task lifecycle status.
///
/// # State Machine
///
/// ```text
/// Pending -> Running, Cancelled
/// Running -> Completed, Failed, Cancelled
/// Pending -> Failed            (launch rejected before a worker started)
/// Completed, Failed, Cancelled -> (terminal, no transitions)
/// ```
///
/// Self-transitions are rejected.
///
/// # Examples
///
/// ```
/// use fleet_futures::TaskStatus;
///
/// assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Running));
/// assert!(!TaskStatus::Completed.can_transition_to(&TaskStatus::Running));
/// assert!(!TaskStatus::Running.can_transition_to(&TaskStatus::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered and waiting for admission (or for its launch to return).
    Pending,
    /// A worker has been launched for the task.
    Running,
    /// The worker reported success (terminal).
    Completed,
    /// The task failed (terminal).
    Failed,
    /// The task was cancelled (terminal).
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns `true` if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// `Pending -> Failed` covers a launch that is rejected (fatally, or after
    /// exhausting its requeues) before any worker ever ran.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Validates a transition from this status to `next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fleet_futures::{TaskId, TaskStatus};
    ///
    /// let id = TaskId::from("task-1");
    /// assert!(TaskStatus::Running.validate_transition(&id, &TaskStatus::Completed).is_ok());
    /// assert!(TaskStatus::Completed.validate_transition(&id, &TaskStatus::Running).is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &TaskId, next: &Self) -> Result<(), FleetError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(FleetError::InvalidTransition {
                task_id: task_id.clone(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// Requested compute shape of a task or worker.
///
/// CPU is expressed in provider CPU units (1024 units = 1 vCPU), memory in
/// MiB, matching the Fargate task-size vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceShape {
    /// CPU units (1024 = 1 vCPU).
    pub cpu_units: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

impl ResourceShape {
    /// Creates a shape from CPU units and MiB of memory.
    pub const fn new(cpu_units: u32, memory_mib: u32) -> Self {
        Self {
            cpu_units,
            memory_mib,
        }
    }

    /// The empty shape, used as the additive identity.
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Returns the shape in vCPUs.
    pub fn vcpus(&self) -> f64 {
        f64::from(self.cpu_units) / 1024.0
    }

    /// Returns the memory in GiB.
    pub fn memory_gib(&self) -> f64 {
        f64::from(self.memory_mib) / 1024.0
    }

    /// Component-wise saturating sum.
    pub fn saturating_add(&self, other: &Self) -> Self {
        Self::new(
            self.cpu_units.saturating_add(other.cpu_units),
            self.memory_mib.saturating_add(other.memory_mib),
        )
    }

    /// Returns `true` if both components are less than or equal to `limit`'s.
    pub fn fits_within(&self, limit: &Self) -> bool {
        self.cpu_units <= limit.cpu_units && self.memory_mib <= limit.memory_mib
    }
}

impl fmt::Display for ResourceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cpu/{}MiB", self.cpu_units, self.memory_mib)
    }
}

/// Serialized work unit: a function name plus its JSON arguments.
///
/// The scheduler never inspects the descriptor. It is handed verbatim to the
/// executor, which ships it to the worker under `tasks/{task_id}`.
///
/// # Examples
///
/// ```
/// use fleet_futures::WorkDescriptor;
/// use serde_json::json;
///
/// let work = WorkDescriptor::new("square", json!(4));
/// assert_eq!(work.function, "square");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Name of the function the worker should run.
    pub function: String,
    /// Arguments passed to the function.
    pub args: Value,
}

impl WorkDescriptor {
    /// Creates a descriptor from a function name and JSON arguments.
    pub fn new(function: impl Into<String>, args: Value) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    /// Creates a descriptor from any serializable argument value.
    pub fn with_args<T: Serialize>(
        function: impl Into<String>,
        args: &T,
    ) -> Result<Self, FleetError> {
        Ok(Self::new(function, serde_json::to_value(args)?))
    }
}

/// Classification of a task failure, persisted alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work itself raised an error.
    Runtime,
    /// The launch was permanently rejected.
    FatalLaunch,
    /// Infrastructure stayed unavailable after all retries and requeues.
    TransientInfra,
    /// The worker disappeared without reporting.
    Vanished,
    /// No terminal report within the task timeout.
    Timeout,
}

/// Recorded failure of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
    /// The elapsed bound, for [`FailureKind::Timeout`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskFailure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timeout_ms: None,
        }
    }

    /// Creates a timeout failure for the given bound.
    pub fn timeout(after: Duration) -> Self {
        let timeout_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
        Self {
            kind: FailureKind::Timeout,
            message: format!("no terminal report within {timeout_ms}ms"),
            timeout_ms: Some(timeout_ms),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// What a worker produced, as persisted in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The function returned a value.
    Success {
        /// The returned value.
        value: Value,
    },
    /// The task failed.
    Failure {
        /// The recorded failure.
        failure: TaskFailure,
    },
}

impl TaskOutcome {
    /// Convenience constructor for a successful outcome.
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    /// Convenience constructor for a failed outcome.
    pub fn failure(failure: TaskFailure) -> Self {
        Self::Failure { failure }
    }
}
