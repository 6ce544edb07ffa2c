//! Wave queue admission tests.
//!
//! Exercises `PlanState` directly: FIFO admission, wave progression as slots
//! free, launch requeues, cancellation of queued tasks, and both quota
//! modes. No executor is involved; every test drives the pure state
//! transitions the session performs under its lock.

use chrono::Utc;
use pretty_assertions::assert_eq;

use fleet_futures::queue::{PlanState, SlotPhase};
use fleet_futures::{QuotaMode, ResourceShape, TaskId};

const SMALL: ResourceShape = ResourceShape::new(256, 512);

fn ids(names: &[&str]) -> Vec<TaskId> {
    names.iter().map(|n| TaskId::from(*n)).collect()
}

fn queued(names: &[&str]) -> PlanState {
    names
        .iter()
        .fold(PlanState::new(), |state, name| state.enqueue(TaskId::from(*name), SMALL))
}

fn advance(state: &PlanState, quota: u32) -> (PlanState, Vec<TaskId>) {
    let step = state.advance(&QuotaMode::Tasks(quota), Utc::now());
    let admitted = step.wave.map(|w| w.members).unwrap_or_default();
    (step.state, admitted)
}

// ─── FIFO Admission ─────────────────────────────────────────────────────────

#[test]
fn quota_one_admits_in_submission_order() {
    let state = queued(&["a", "b", "c"]);

    let (state, first) = advance(&state, 1);
    assert_eq!(first, ids(&["a"]));

    let (state, none) = advance(&state, 1);
    assert!(none.is_empty(), "a full quota admits nothing");

    let (state, _) = state.release(&TaskId::from("a"));
    let (state, second) = advance(&state, 1);
    assert_eq!(second, ids(&["b"]));

    let (state, _) = state.release(&TaskId::from("b"));
    let (state, third) = advance(&state, 1);
    assert_eq!(third, ids(&["c"]));
    assert_eq!(state.pending_count(), 0);
}

#[test]
fn freed_slots_form_a_new_wave() {
    let state = queued(&["a", "b", "c", "d", "e"]);
    let (state, wave0) = advance(&state, 2);
    assert_eq!(wave0, ids(&["a", "b"]));
    assert_eq!(state.active_waves().len(), 1);

    // Completions arrive out of order.
    let (state, _) = state.release(&TaskId::from("b"));
    let step = state.advance(&QuotaMode::Tasks(2), Utc::now());
    let wave1 = step.wave.unwrap();
    assert_eq!(wave1.index, 1);
    assert_eq!(wave1.members, ids(&["c"]));

    let state = step.state;
    let indexes: Vec<u64> = state.active_waves().iter().map(|w| w.index).collect();
    assert_eq!(indexes, vec![0, 1]);

    // Wave 0 retires once its last member is released.
    let (state, _) = state.release(&TaskId::from("a"));
    let indexes: Vec<u64> = state.active_waves().iter().map(|w| w.index).collect();
    assert_eq!(indexes, vec![1]);
    assert_eq!(state.next_wave_index(), 2);
}

#[test]
fn admitted_slots_start_in_launching_phase() {
    let (state, _) = advance(&queued(&["a", "b"]), 2);
    assert_eq!(state.launching_count(), 2);

    let state = state.mark_running(&TaskId::from("a"));
    assert_eq!(state.launching_count(), 1);
    assert_eq!(state.slot(&TaskId::from("a")).unwrap().phase, SlotPhase::Running);
    assert_eq!(state.occupied_count(), 2);
}

#[test]
fn enqueue_is_idempotent_for_queued_and_admitted_tasks() {
    let state = queued(&["a", "b"]).enqueue(TaskId::from("a"), SMALL);
    assert_eq!(state.pending_ids(), ids(&["a", "b"]));

    let (state, _) = advance(&state, 1);
    let state = state.enqueue(TaskId::from("a"), SMALL);
    assert_eq!(state.pending_ids(), ids(&["b"]));
    assert_eq!(state.occupied_count(), 1);
}

// ─── Release and Requeue ────────────────────────────────────────────────────

#[test]
fn release_frees_a_slot_exactly_once() {
    let (state, _) = advance(&queued(&["a", "b"]), 2);
    let (state, released) = state.release(&TaskId::from("a"));
    assert!(released);
    let (state, released_again) = state.release(&TaskId::from("a"));
    assert!(!released_again);
    assert_eq!(state.occupied_count(), 1);
}

#[test]
fn failed_launch_returns_to_queue_head() {
    let (state, _) = advance(&queued(&["a", "b", "c"]), 1);
    let state = state.requeue_front(&TaskId::from("a"));

    assert_eq!(state.occupied_count(), 0);
    assert_eq!(state.pending_ids(), ids(&["a", "b", "c"]));

    let (_, retried) = advance(&state, 1);
    assert_eq!(retried, ids(&["a"]));
}

#[test]
fn requeue_of_a_task_without_slot_is_a_no_op() {
    let state = queued(&["a"]);
    let after = state.requeue_front(&TaskId::from("ghost"));
    assert_eq!(after, state);
}

#[test]
fn removing_a_queued_task_leaves_slots_untouched() {
    let (state, _) = advance(&queued(&["a", "b", "c"]), 1);
    let (state, removed) = state.remove_pending(&TaskId::from("b"));
    assert!(removed);
    assert_eq!(state.occupied_count(), 1);
    assert_eq!(state.pending_ids(), ids(&["c"]));

    let (_, removed_again) = state.remove_pending(&TaskId::from("b"));
    assert!(!removed_again);
}

// ─── Resource Quota ─────────────────────────────────────────────────────────

#[test]
fn resource_quota_admits_by_summed_shape() {
    let quota = QuotaMode::Resources(ResourceShape::new(1024, 2048));
    let big = ResourceShape::new(768, 1024);
    let state = PlanState::new()
        .enqueue(TaskId::from("small-1"), SMALL)
        .enqueue(TaskId::from("big"), big)
        .enqueue(TaskId::from("small-2"), SMALL);

    let step = state.advance(&quota, Utc::now());
    assert_eq!(step.wave.unwrap().members, ids(&["small-1", "big"]));
    assert_eq!(step.state.in_use(), ResourceShape::new(1024, 1536));
}

#[test]
fn resource_quota_does_not_skip_a_blocked_head() {
    let quota = QuotaMode::Resources(ResourceShape::new(1024, 2048));
    let big = ResourceShape::new(1024, 1024);
    let state = PlanState::new()
        .enqueue(TaskId::from("small-1"), SMALL)
        .enqueue(TaskId::from("big"), big)
        .enqueue(TaskId::from("small-2"), SMALL);

    let step = state.advance(&quota, Utc::now());
    assert_eq!(step.wave.unwrap().members, ids(&["small-1"]));
    // "small-2" would fit, but "big" is ahead of it.
    assert_eq!(step.state.pending_ids(), ids(&["big", "small-2"]));

    let (state, _) = step.state.release(&TaskId::from("small-1"));
    let step = state.advance(&quota, Utc::now());
    assert_eq!(step.wave.unwrap().members, ids(&["big"]));
}

#[test]
fn quota_mode_reports_impossible_shapes() {
    let quota = QuotaMode::Resources(ResourceShape::new(512, 1024));
    assert!(quota.can_ever_admit(&SMALL));
    assert!(!quota.can_ever_admit(&ResourceShape::new(1024, 512)));
    assert!(QuotaMode::Tasks(1).can_ever_admit(&ResourceShape::new(16_384, 122_880)));
}
