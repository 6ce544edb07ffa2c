//! Task record -- the registry's internal representation of a task.
//!
//! [`TaskRecord`] carries the opaque work descriptor together with the
//! lifecycle fields the scheduler maintains: status, timestamps, the worker
//! handle while running, and the result reference or failure once terminal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::executor::WorkerHandle;
use crate::types::task::{ResourceShape, TaskFailure, TaskId, TaskStatus, WorkDescriptor};

/// Registry-owned state of one task.
///
/// All fields are public so that snapshots returned by
/// [`Session::task`](crate::session::Session::task) can be inspected freely.
/// Mutation goes through [`TaskRegistry`](crate::registry::TaskRegistry),
/// which validates every status change against the state machine.
///
/// # Examples
///
/// ```
/// use fleet_futures::domain::TaskRecord;
/// use fleet_futures::{ResourceShape, TaskId, TaskStatus, WorkDescriptor};
/// use serde_json::json;
///
/// let record = TaskRecord::new(
///     TaskId::from("t-1"),
///     WorkDescriptor::new("square", json!(3)),
///     ResourceShape::new(256, 512),
///     None,
/// );
/// assert_eq!(record.status, TaskStatus::Pending);
/// assert!(record.started_at.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Session-unique identifier.
    pub id: TaskId,

    /// The opaque work unit.
    pub descriptor: WorkDescriptor,

    /// Requested compute shape.
    pub shape: ResourceShape,

    /// When the task was registered.
    pub submitted_at: DateTime<Utc>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Set once, on the pending to running transition.
    pub started_at: Option<DateTime<Utc>>,

    /// Set on the transition into a terminal status.
    pub completed_at: Option<DateTime<Utc>>,

    /// Key of the stored outcome, set on success.
    pub result_ref: Option<String>,

    /// Recorded failure, set when the task fails.
    pub failure: Option<TaskFailure>,

    /// Assigned worker, set while the task is running.
    pub worker: Option<WorkerHandle>,

    /// Index of the wave that admitted the task.
    pub wave: Option<u64>,

    /// Per-task timeout overriding the plan default.
    pub timeout: Option<Duration>,

    /// Launch attempts issued so far (each admission counts one).
    pub launch_attempts: u32,

    /// Runtime reported by the executor, preferred over timestamps for billing.
    pub reported_runtime: Option<Duration>,
}

impl TaskRecord {
    /// Creates a pending record submitted now.
    pub fn new(
        id: TaskId,
        descriptor: WorkDescriptor,
        shape: ResourceShape,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            descriptor,
            shape,
            submitted_at: Utc::now(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result_ref: None,
            failure: None,
            worker: None,
            wave: None,
            timeout,
            launch_attempts: 0,
            reported_runtime: None,
        }
    }

    /// Returns `true` if the task is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the record to `next`, validating the transition.
    ///
    /// Entering a terminal status stamps `completed_at` and clears the worker
    /// handle.
    pub(crate) fn transition(&mut self, next: TaskStatus) -> Result<(), FleetError> {
        self.status.validate_transition(&self.id, &next)?;
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.worker = None;
        }
        Ok(())
    }

    /// Time the task spent on a worker.
    ///
    /// Uses the executor-reported runtime when present. Otherwise measures
    /// from `started_at` to `completed_at`, or to now for a running task.
    /// Returns `None` for a task that never started.
    pub fn runtime(&self) -> Option<Duration> {
        if let Some(reported) = self.reported_runtime {
            return Some(reported);
        }
        let started = self.started_at?;
        let ended = self.completed_at.unwrap_or_else(Utc::now);
        Some((ended - started).to_std().unwrap_or_default())
    }
}
