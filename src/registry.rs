//! Authoritative record of every submitted task.
//!
//! [`TaskRegistry`] owns each [`TaskRecord`] from submission until the caller
//! discards it. Every status change is validated against the
//! [`TaskStatus`] state machine; the registry never moves a task backwards
//! or out of a terminal status.
//!
//! The registry is a plain single-owner structure. The session keeps it
//! behind its single-writer lock together with the wave queue, so a status
//! change and the matching slot release are always observed together.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use crate::domain::TaskRecord;
use crate::error::FleetError;
use crate::executor::WorkerHandle;
use crate::types::task::{ResourceShape, TaskFailure, TaskId, TaskStatus, WorkDescriptor};

/// Result of [`TaskRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new record was created.
    Created,
    /// A record with this identifier already existed and was left untouched.
    Existing,
}

/// Task registry keyed by [`TaskId`].
///
/// # Examples
///
/// ```
/// use fleet_futures::registry::{Registration, TaskRegistry};
/// use fleet_futures::{ResourceShape, TaskId, TaskStatus, WorkDescriptor};
/// use serde_json::json;
///
/// let mut registry = TaskRegistry::new();
/// let id = TaskId::from("a");
/// let work = WorkDescriptor::new("square", json!(2));
/// let shape = ResourceShape::new(256, 512);
///
/// assert_eq!(registry.register(id.clone(), work.clone(), shape, None), Registration::Created);
/// assert_eq!(registry.register(id.clone(), work, shape, None), Registration::Existing);
/// assert_eq!(registry.status(&id).unwrap(), TaskStatus::Pending);
/// assert!(registry.get(&TaskId::from("b")).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskRecord>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending task. Re-registering an existing identifier is a
    /// no-op.
    pub fn register(
        &mut self,
        id: TaskId,
        descriptor: WorkDescriptor,
        shape: ResourceShape,
        timeout: Option<Duration>,
    ) -> Registration {
        if self.tasks.contains_key(&id) {
            return Registration::Existing;
        }
        let record = TaskRecord::new(id.clone(), descriptor, shape, timeout);
        self.tasks.insert(id, record);
        Registration::Created
    }

    /// Looks up a task.
    ///
    /// # Errors
    ///
    /// [`FleetError::UnknownTask`] if no task has this identifier.
    pub fn get(&self, id: &TaskId) -> Result<&TaskRecord, FleetError> {
        self.tasks.get(id).ok_or_else(|| FleetError::UnknownTask {
            task_id: id.clone(),
        })
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut TaskRecord, FleetError> {
        self.tasks.get_mut(id).ok_or_else(|| FleetError::UnknownTask {
            task_id: id.clone(),
        })
    }

    /// Current status of a task.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatus, FleetError> {
        self.get(id).map(|record| record.status)
    }

    /// Counts one more launch attempt and returns the new count.
    pub fn record_launch_attempt(&mut self, id: &TaskId, wave: u64) -> Result<u32, FleetError> {
        let record = self.get_mut(id)?;
        record.launch_attempts += 1;
        record.wave = Some(wave);
        Ok(record.launch_attempts)
    }

    /// Pending to running: assigns the worker and stamps `started_at`.
    pub fn mark_running(
        &mut self,
        id: &TaskId,
        worker: WorkerHandle,
    ) -> Result<&TaskRecord, FleetError> {
        let record = self.get_mut(id)?;
        record.transition(TaskStatus::Running)?;
        if record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }
        record.worker = Some(worker);
        Ok(record)
    }

    /// Running to completed with the stored outcome's key.
    pub fn mark_completed(
        &mut self,
        id: &TaskId,
        result_ref: String,
        runtime: Option<Duration>,
    ) -> Result<&TaskRecord, FleetError> {
        let record = self.get_mut(id)?;
        record.transition(TaskStatus::Completed)?;
        record.result_ref = Some(result_ref);
        record.reported_runtime = runtime.or(record.reported_runtime);
        Ok(record)
    }

    /// Pending or running to failed with the recorded failure.
    pub fn mark_failed(
        &mut self,
        id: &TaskId,
        failure: TaskFailure,
        runtime: Option<Duration>,
    ) -> Result<&TaskRecord, FleetError> {
        let record = self.get_mut(id)?;
        record.transition(TaskStatus::Failed)?;
        record.failure = Some(failure);
        record.reported_runtime = runtime.or(record.reported_runtime);
        Ok(record)
    }

    /// Pending or running to cancelled.
    ///
    /// Returns the worker handle the task held, if it was running.
    pub fn mark_cancelled(&mut self, id: &TaskId) -> Result<Option<WorkerHandle>, FleetError> {
        let record = self.get_mut(id)?;
        let worker = record.worker.clone();
        record.transition(TaskStatus::Cancelled)?;
        Ok(worker)
    }

    /// Removes a terminal task.
    ///
    /// # Errors
    ///
    /// - [`FleetError::UnknownTask`] if the task is not registered.
    /// - [`FleetError::NotResolved`] if the task is not terminal yet.
    pub fn discard(&mut self, id: &TaskId) -> Result<TaskRecord, FleetError> {
        let status = self.status(id)?;
        if !status.is_terminal() {
            return Err(FleetError::NotResolved {
                task_id: id.clone(),
                status,
            });
        }
        self.tasks.remove(id).ok_or_else(|| FleetError::UnknownTask {
            task_id: id.clone(),
        })
    }

    /// Number of tasks in `status`.
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|r| r.status == status).count()
    }

    /// Number of tasks with a live worker.
    pub fn running_count(&self) -> usize {
        self.count(TaskStatus::Running)
    }

    /// Identifiers of tasks that have not reached a terminal status.
    pub fn unresolved(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .tasks
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
