//! Cost accounting tests.
//!
//! Tasks are driven through the registry so that every record the
//! accountant sees went through real state transitions.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use fleet_futures::cost::CostAccountant;
use fleet_futures::executor::WorkerHandle;
use fleet_futures::registry::TaskRegistry;
use fleet_futures::{
    FailureKind, FleetError, Pricing, ResourceShape, TaskFailure, TaskId, TaskStatus,
    WorkDescriptor,
};

const ONE_VCPU: ResourceShape = ResourceShape::new(1024, 2048);

/// Registers `id` and moves it to running.
fn started(registry: &mut TaskRegistry, id: &str) -> TaskId {
    let id = TaskId::from(id);
    registry.register(id.clone(), WorkDescriptor::new("work", json!(null)), ONE_VCPU, None);
    registry
        .mark_running(&id, WorkerHandle::new(format!("w-{id}"), id.clone()))
        .unwrap();
    id
}

fn completed(registry: &mut TaskRegistry, id: &str, runtime: Duration) -> TaskId {
    let id = started(registry, id);
    registry
        .mark_completed(&id, format!("results/{id}"), Some(runtime))
        .unwrap();
    id
}

fn flat_pricing() -> Pricing {
    Pricing {
        per_vcpu_hour: 3.6,
        per_gib_hour: 0.0,
        granularity: Duration::from_secs(1),
        minimum: Duration::ZERO,
    }
}

#[test]
fn completed_task_is_billed_for_rounded_runtime() {
    let mut registry = TaskRegistry::new();
    let id = completed(&mut registry, "a", Duration::from_millis(10_200));

    let mut accountant = CostAccountant::new(flat_pricing());
    let record = accountant.record(registry.get(&id).unwrap()).unwrap().unwrap();

    assert_eq!(record.billed_duration, Duration::from_secs(11));
    assert_eq!(record.runtime, Duration::from_millis(10_200));
    // 1 vCPU at 3.6/hour is 0.001 per second.
    assert!((record.unit_rate - 0.001).abs() < 1e-12);
    assert!((record.cost - 0.011).abs() < 1e-9);
}

#[test]
fn minimum_billing_applies_to_short_tasks() {
    let mut registry = TaskRegistry::new();
    let id = completed(&mut registry, "a", Duration::from_secs(3));

    let mut accountant = CostAccountant::new(Pricing::default());
    let record = accountant.record(registry.get(&id).unwrap()).unwrap().unwrap();
    assert_eq!(record.billed_duration, Duration::from_secs(60));
}

#[test]
fn failed_task_that_ran_is_billed() {
    let mut registry = TaskRegistry::new();
    let id = started(&mut registry, "a");
    registry
        .mark_failed(
            &id,
            TaskFailure::new(FailureKind::Runtime, "boom"),
            Some(Duration::from_secs(30)),
        )
        .unwrap();

    let mut accountant = CostAccountant::new(flat_pricing());
    let record = accountant.record(registry.get(&id).unwrap()).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.cost > 0.0);
}

#[test]
fn task_that_never_started_has_no_record() {
    let mut registry = TaskRegistry::new();
    let id = TaskId::from("queued");
    registry.register(id.clone(), WorkDescriptor::new("work", json!(null)), ONE_VCPU, None);
    registry.mark_cancelled(&id).unwrap();

    let mut accountant = CostAccountant::new(flat_pricing());
    assert_eq!(accountant.record(registry.get(&id).unwrap()).unwrap(), None);
    assert_eq!(accountant.total(), 0.0);
}

#[test]
fn unresolved_task_cannot_be_billed() {
    let mut registry = TaskRegistry::new();
    let id = started(&mut registry, "a");

    let mut accountant = CostAccountant::new(flat_pricing());
    let err = accountant.record(registry.get(&id).unwrap()).unwrap_err();
    assert!(matches!(
        err,
        FleetError::NotResolved {
            status: TaskStatus::Running,
            ..
        }
    ));
}

#[test]
fn recording_twice_does_not_double_count() {
    let mut registry = TaskRegistry::new();
    let id = completed(&mut registry, "a", Duration::from_secs(5));

    let mut accountant = CostAccountant::new(flat_pricing());
    let first = accountant.record(registry.get(&id).unwrap()).unwrap();
    let total = accountant.total();
    let second = accountant.record(registry.get(&id).unwrap()).unwrap();

    assert_eq!(first, second);
    assert_eq!(accountant.total(), total);
    assert_eq!(accountant.records().len(), 1);
}

#[test]
fn report_totals_match_records() {
    let mut registry = TaskRegistry::new();
    let mut accountant = CostAccountant::new(flat_pricing());
    for (name, secs) in [("a", 5), ("b", 17), ("c", 42)] {
        let id = completed(&mut registry, name, Duration::from_secs(secs));
        accountant.record(registry.get(&id).unwrap()).unwrap();
    }

    let report = accountant.report();
    let summed: f64 = report.records.iter().map(|r| r.cost).sum();
    assert!((report.total_cost - summed).abs() < 1e-12);
    assert_eq!(report.total_billed, Duration::from_secs(64));
    assert!((report.cost_for_status(TaskStatus::Completed) - report.total_cost).abs() < 1e-12);
    assert_eq!(report.record(&TaskId::from("b")).unwrap().billed_duration, Duration::from_secs(17));
}
