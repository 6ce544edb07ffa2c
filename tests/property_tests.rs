//! Property-based tests and fuzz-style decoding tests using proptest.
//!
//! Property tests drive `PlanState` through arbitrary operation sequences
//! and check the admission invariants after every step: the quota is never
//! exceeded, admission follows submission order, and releasing a slot is
//! idempotent. Billing properties cover rounding monotonicity and report
//! totals. Fuzz tests feed arbitrary bytes to the result store decoder and
//! arbitrary JSON to the public types, which must reject garbage without
//! panicking.

use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;
use serde_json::json;

use fleet_futures::cost::CostAccountant;
use fleet_futures::executor::WorkerHandle;
use fleet_futures::queue::PlanState;
use fleet_futures::registry::TaskRegistry;
use fleet_futures::store::backend::result_key;
use fleet_futures::store::{InMemoryResultStore, ResultStore};
use fleet_futures::{Pricing, QuotaMode, ResourceShape, TaskId, TaskStatus, WorkDescriptor};

const SMALL: ResourceShape = ResourceShape::new(256, 512);

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Submit,
    Advance,
    Release(usize),
    Requeue(usize),
    CancelQueued(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Submit),
        3 => Just(Op::Advance),
        2 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Requeue),
        1 => any::<usize>().prop_map(Op::CancelQueued),
    ]
}

fn arb_fifo_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Submit),
        Just(Op::Advance),
        any::<usize>().prop_map(Op::Release),
    ]
}

fn arb_shape() -> impl Strategy<Value = ResourceShape> {
    (1u32..=8, 1u32..=8).prop_map(|(cpu, mem)| ResourceShape::new(cpu * 256, mem * 512))
}

/// Model of which tasks hold slots, kept alongside the state under test.
struct Harness {
    state: PlanState,
    quota: QuotaMode,
    submitted: u32,
    occupied: Vec<TaskId>,
    admitted: Vec<TaskId>,
}

impl Harness {
    fn new(quota: QuotaMode) -> Self {
        Self {
            state: PlanState::new(),
            quota,
            submitted: 0,
            occupied: Vec::new(),
            admitted: Vec::new(),
        }
    }

    fn apply(&mut self, op: &Op, shape: ResourceShape) {
        match op {
            Op::Submit => {
                let id = TaskId::from(format!("task-{:04}", self.submitted));
                self.submitted += 1;
                self.state = self.state.enqueue(id, shape);
            },
            Op::Advance => {
                let step = self.state.advance(&self.quota, Utc::now());
                self.state = step.state;
                if let Some(wave) = step.wave {
                    self.occupied.extend(wave.members.iter().cloned());
                    self.admitted.extend(wave.members);
                }
            },
            Op::Release(i) => {
                if !self.occupied.is_empty() {
                    let id = self.occupied.remove(i % self.occupied.len());
                    let (next, released) = self.state.release(&id);
                    assert!(released, "{id} held a slot");
                    self.state = next;
                }
            },
            Op::Requeue(i) => {
                if !self.occupied.is_empty() {
                    let id = self.occupied.remove(i % self.occupied.len());
                    self.state = self.state.requeue_front(&id);
                    assert_eq!(self.state.pending_ids().first(), Some(&id));
                }
            },
            Op::CancelQueued(i) => {
                let queued = self.state.pending_ids();
                if !queued.is_empty() {
                    let id = &queued[i % queued.len()];
                    let (next, removed) = self.state.remove_pending(id);
                    assert!(removed);
                    self.state = next;
                }
            },
        }
    }
}

// ─── Property Tests: Admission ──────────────────────────────────────────────

proptest! {
    /// A task-count quota is never exceeded, whatever the operation order.
    #[test]
    fn task_quota_is_never_exceeded(
        quota in 1u32..=6,
        ops in prop::collection::vec(arb_op(), 1..120),
    ) {
        let mut harness = Harness::new(QuotaMode::Tasks(quota));
        for op in &ops {
            harness.apply(op, SMALL);
            prop_assert!(harness.state.occupied_count() <= quota as usize);
            prop_assert_eq!(harness.state.occupied_count(), harness.occupied.len());
        }
    }

    /// Summed shapes of occupied slots never exceed a resource quota.
    #[test]
    fn resource_quota_is_never_exceeded(
        ops in prop::collection::vec((arb_op(), arb_shape()), 1..120),
    ) {
        let limit = ResourceShape::new(2048, 4096);
        let mut harness = Harness::new(QuotaMode::Resources(limit));
        for (op, shape) in &ops {
            harness.apply(op, *shape);
            prop_assert!(
                harness.state.in_use().fits_within(&limit),
                "in use {} exceeds {}",
                harness.state.in_use(),
                limit
            );
        }
    }

    /// Without requeues or cancellations, tasks are admitted exactly in
    /// submission order.
    #[test]
    fn admission_follows_submission_order(
        quota in 1u32..=4,
        ops in prop::collection::vec(arb_fifo_op(), 1..100),
    ) {
        let mut harness = Harness::new(QuotaMode::Tasks(quota));
        for op in &ops {
            harness.apply(op, SMALL);
        }
        let expected: Vec<TaskId> = (0..harness.admitted.len())
            .map(|n| TaskId::from(format!("task-{n:04}")))
            .collect();
        prop_assert_eq!(&harness.admitted, &expected);
    }

    /// A full quota with a non-empty queue admits nothing more; a free slot
    /// with a non-empty queue always admits.
    #[test]
    fn advance_fills_every_free_slot(quota in 1u32..=6, queued in 0u32..12) {
        let mut harness = Harness::new(QuotaMode::Tasks(quota));
        for _ in 0..queued {
            harness.apply(&Op::Submit, SMALL);
        }
        harness.apply(&Op::Advance, SMALL);
        prop_assert_eq!(harness.state.occupied_count(), queued.min(quota) as usize);
        prop_assert_eq!(harness.state.pending_count(), queued.saturating_sub(quota) as usize);
    }

    /// Releasing an already released task leaves the state untouched.
    #[test]
    fn release_is_idempotent(
        quota in 1u32..=4,
        ops in prop::collection::vec(arb_op(), 1..60),
        pick in any::<usize>(),
    ) {
        let mut harness = Harness::new(QuotaMode::Tasks(quota));
        for op in &ops {
            harness.apply(op, SMALL);
        }
        harness.apply(&Op::Advance, SMALL);
        prop_assume!(!harness.occupied.is_empty());

        let id = harness.occupied[pick % harness.occupied.len()].clone();
        let (once, first) = harness.state.release(&id);
        let (twice, second) = once.release(&id);
        prop_assert!(first);
        prop_assert!(!second);
        prop_assert_eq!(once, twice);
    }
}

// ─── Property Tests: Billing ────────────────────────────────────────────────

fn arb_pricing() -> impl Strategy<Value = Pricing> {
    (
        prop::sample::select(vec![0u64, 1, 5, 60]),
        prop::sample::select(vec![0u64, 60]),
    )
        .prop_map(|(granularity, minimum)| Pricing {
            granularity: Duration::from_secs(granularity),
            minimum: Duration::from_secs(minimum),
            ..Pricing::default()
        })
}

proptest! {
    /// Billed duration covers the runtime, honours the minimum, and grows
    /// with the runtime.
    #[test]
    fn billing_is_monotonic(
        pricing in arb_pricing(),
        a in 0u64..10_000_000,
        b in 0u64..10_000_000,
    ) {
        let (short, long) = (Duration::from_millis(a.min(b)), Duration::from_millis(a.max(b)));
        let billed_short = pricing.billed_duration(short);
        let billed_long = pricing.billed_duration(long);

        prop_assert!(billed_short >= short);
        prop_assert!(billed_short >= pricing.minimum);
        prop_assert!(billed_short <= billed_long);
        prop_assert!(pricing.cost(&SMALL, billed_short) <= pricing.cost(&SMALL, billed_long));
    }

    /// Report totals equal the sum of their records.
    #[test]
    fn report_total_is_sum_of_records(runtimes in prop::collection::vec(0u64..7_200_000, 0..20)) {
        let mut registry = TaskRegistry::new();
        let mut accountant = CostAccountant::new(Pricing::default());
        for (n, millis) in runtimes.iter().enumerate() {
            let id = TaskId::from(format!("t-{n}"));
            registry.register(id.clone(), WorkDescriptor::new("f", json!(n)), SMALL, None);
            registry.mark_running(&id, WorkerHandle::new(format!("w-{n}"), id.clone())).unwrap();
            registry
                .mark_completed(&id, format!("results/{id}"), Some(Duration::from_millis(*millis)))
                .unwrap();
            accountant.record(registry.get(&id).unwrap()).unwrap();
        }

        let report = accountant.report();
        prop_assert_eq!(report.records.len(), runtimes.len());
        let summed: f64 = report.records.iter().map(|r| r.cost).sum();
        prop_assert!((report.total_cost - summed).abs() < 1e-9);
        let billed: Duration = report.records.iter().map(|r| r.billed_duration).sum();
        prop_assert_eq!(report.total_billed, billed);
        prop_assert!(report.records.iter().all(|r| r.status == TaskStatus::Completed));
    }
}

// ─── Fuzz Tests: Decoding ───────────────────────────────────────────────────

proptest! {
    /// Arbitrary stored bytes decode to an error, never a panic.
    #[test]
    fn fuzz_stored_object_decoding(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let store = InMemoryResultStore::new();
        store.backend().replace_raw(&result_key("fuzz"), bytes);
        let result = runtime.block_on(store.get(&TaskId::from("fuzz")));
        prop_assert!(result.is_err());
    }

    /// Arbitrary JSON never panics the status or descriptor deserializers.
    #[test]
    fn fuzz_public_type_deserialization(text in "\\PC{0,200}") {
        let _ = serde_json::from_str::<TaskStatus>(&text);
        let _ = serde_json::from_str::<WorkDescriptor>(&text);
        let _ = serde_json::from_str::<ResourceShape>(&text);
    }
}
