//! Waves and occupied slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::task::{ResourceShape, TaskId};

/// A batch of tasks admitted by one [`advance`](super::PlanState::advance).
///
/// A wave stays active while at least one of its members still holds a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    /// Monotonically increasing wave index, starting at 0.
    pub index: u64,
    /// Tasks admitted in this wave, in admission order.
    pub members: Vec<TaskId>,
    /// When the wave was admitted.
    pub admitted_at: DateTime<Utc>,
}

/// Whether an occupied slot is still waiting on its launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPhase {
    /// Admitted; the launch call has not returned yet.
    Launching,
    /// The launch returned a worker handle.
    Running,
}

/// Quota held by one admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Requested shape counted against a resource quota.
    pub shape: ResourceShape,
    /// Index of the admitting wave.
    pub wave: u64,
    /// Launch phase.
    pub phase: SlotPhase,
}

/// A task waiting in the pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// The waiting task.
    pub id: TaskId,
    /// Its requested shape.
    pub shape: ResourceShape,
}
