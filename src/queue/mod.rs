//! Admission control under a fixed concurrency quota.
//!
//! [`PlanState`] is the wave queue: an ordered queue of pending tasks plus
//! the slots held by admitted ones. Every operation takes `&self` and
//! returns a new state. Nothing is mutated in place, so two holders of a
//! `PlanState` can never observe diverging queue contents after a partial
//! update.
//!
//! # Admission
//!
//! [`advance`](PlanState::advance) admits tasks from the head of the queue,
//! in order, while the [`QuotaMode`] admits them. Admission is strict FIFO:
//! if the head task does not fit, nothing behind it is admitted either.
//! Admitted tasks hold a [`Slot`] in phase [`SlotPhase::Launching`] which
//! counts against the quota immediately, before any launch call is made.
//!
//! # Release
//!
//! [`release`](PlanState::release) frees a slot exactly once. Releasing a
//! task that holds no slot is a no-op that reports `false`, which makes the
//! race between a timeout, a cancellation and a late completion report
//! harmless.
//!
//! # Examples
//!
//! ```
//! use chrono::Utc;
//! use fleet_futures::queue::PlanState;
//! use fleet_futures::{QuotaMode, ResourceShape, TaskId};
//!
//! let shape = ResourceShape::new(256, 512);
//! let state = PlanState::new()
//!     .enqueue(TaskId::from("a"), shape)
//!     .enqueue(TaskId::from("b"), shape)
//!     .enqueue(TaskId::from("c"), shape);
//!
//! let step = state.advance(&QuotaMode::Tasks(2), Utc::now());
//! let wave = step.wave.unwrap();
//! assert_eq!(wave.members, vec![TaskId::from("a"), TaskId::from("b")]);
//! assert_eq!(step.state.occupied_count(), 2);
//! assert_eq!(step.state.pending_count(), 1);
//!
//! // The original state is untouched.
//! assert_eq!(state.pending_count(), 3);
//! ```

mod wave;

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::types::plan::QuotaMode;
use crate::types::task::{ResourceShape, TaskId};

pub use wave::{QueuedTask, Slot, SlotPhase, Wave};

/// Result of [`PlanState::advance`].
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    /// The state after admission.
    pub state: PlanState,
    /// The wave admitted by this call, if any task was admitted.
    pub wave: Option<Wave>,
}

/// Pending queue plus admitted slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanState {
    pending: VecDeque<QueuedTask>,
    occupied: BTreeMap<TaskId, Slot>,
    waves: BTreeMap<u64, Wave>,
    next_wave: u64,
}

impl PlanState {
    /// An empty queue with no admitted tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task to the tail of the pending queue.
    ///
    /// A task that is already queued or admitted is left where it is.
    pub fn enqueue(&self, id: TaskId, shape: ResourceShape) -> Self {
        if self.is_pending(&id) || self.is_occupied(&id) {
            return self.clone();
        }
        let mut next = self.clone();
        next.pending.push_back(QueuedTask { id, shape });
        next
    }

    /// Admits tasks from the head of the queue while the quota allows.
    pub fn advance(&self, quota: &QuotaMode, now: DateTime<Utc>) -> Advance {
        let mut next = self.clone();
        let mut in_use = next.in_use();
        let mut members = Vec::new();
        let index = next.next_wave;

        while let Some(head) = next.pending.front() {
            if !quota.admits(next.occupied.len(), &in_use, &head.shape) {
                break;
            }
            let Some(task) = next.pending.pop_front() else {
                break;
            };
            in_use = in_use.saturating_add(&task.shape);
            next.occupied.insert(
                task.id.clone(),
                Slot {
                    shape: task.shape,
                    wave: index,
                    phase: SlotPhase::Launching,
                },
            );
            members.push(task.id);
        }

        if members.is_empty() {
            return Advance {
                state: next,
                wave: None,
            };
        }

        let wave = Wave {
            index,
            members,
            admitted_at: now,
        };
        next.next_wave += 1;
        next.waves.insert(index, wave.clone());
        Advance {
            state: next,
            wave: Some(wave),
        }
    }

    /// Marks an admitted task's launch as acknowledged.
    ///
    /// Returns the state unchanged if the task holds no slot.
    pub fn mark_running(&self, id: &TaskId) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.occupied.get_mut(id) {
            slot.phase = SlotPhase::Running;
        }
        next
    }

    /// Frees the slot held by `id`.
    ///
    /// Returns the new state and whether a slot was actually released. A
    /// wave whose last member is released is retired.
    pub fn release(&self, id: &TaskId) -> (Self, bool) {
        if !self.is_occupied(id) {
            return (self.clone(), false);
        }
        let mut next = self.clone();
        if let Some(slot) = next.occupied.remove(id) {
            let still_active = next.occupied.values().any(|s| s.wave == slot.wave);
            if !still_active {
                next.waves.remove(&slot.wave);
            }
        }
        (next, true)
    }

    /// Releases the slot of a task whose launch failed and puts the task
    /// back at the head of the queue.
    ///
    /// Returns the state unchanged if the task holds no slot (it was
    /// cancelled while launching).
    pub fn requeue_front(&self, id: &TaskId) -> Self {
        let Some(slot) = self.occupied.get(id).copied() else {
            return self.clone();
        };
        let (mut next, _) = self.release(id);
        next.pending.push_front(QueuedTask {
            id: id.clone(),
            shape: slot.shape,
        });
        next
    }

    /// Removes a task from the pending queue.
    ///
    /// Returns the new state and whether the task was queued.
    pub fn remove_pending(&self, id: &TaskId) -> (Self, bool) {
        let Some(position) = self.pending.iter().position(|t| &t.id == id) else {
            return (self.clone(), false);
        };
        let mut next = self.clone();
        next.pending.remove(position);
        (next, true)
    }

    /// Returns `true` if `id` is waiting in the queue.
    pub fn is_pending(&self, id: &TaskId) -> bool {
        self.pending.iter().any(|t| &t.id == id)
    }

    /// Returns `true` if `id` holds a slot.
    pub fn is_occupied(&self, id: &TaskId) -> bool {
        self.occupied.contains_key(id)
    }

    /// The slot held by `id`, if any.
    pub fn slot(&self, id: &TaskId) -> Option<&Slot> {
        self.occupied.get(id)
    }

    /// Number of tasks holding a slot (launching or running).
    pub fn occupied_count(&self) -> usize {
        self.occupied.len()
    }

    /// Number of tasks whose launch has not returned yet.
    pub fn launching_count(&self) -> usize {
        self.occupied
            .values()
            .filter(|s| s.phase == SlotPhase::Launching)
            .count()
    }

    /// Number of tasks waiting for admission.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queue contents, head first.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.pending.iter().map(|t| t.id.clone()).collect()
    }

    /// Summed shape of all occupied slots.
    pub fn in_use(&self) -> ResourceShape {
        self.occupied
            .values()
            .fold(ResourceShape::zero(), |acc, slot| acc.saturating_add(&slot.shape))
    }

    /// Waves with at least one member still holding a slot, oldest first.
    pub fn active_waves(&self) -> Vec<Wave> {
        self.waves.values().cloned().collect()
    }

    /// Index the next admitted wave will get.
    pub fn next_wave_index(&self) -> u64 {
        self.next_wave
    }
}
