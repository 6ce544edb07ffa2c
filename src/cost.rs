//! Per-task cost records and the session running total.
//!
//! [`CostAccountant::record`] derives one [`CostRecord`] from a terminal
//! task's billed runtime and requested shape. Failed and cancelled tasks
//! that ran on a worker are billed for the time they actually ran; tasks
//! that never started cost nothing and produce no record.
//!
//! Recording is idempotent per task, so the aggregate is the sum of the
//! individual records and never decreases.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::TaskRecord;
use crate::error::FleetError;
use crate::types::cost::{CostRecord, CostReport, Pricing};
use crate::types::task::TaskId;

/// Accumulates cost records for one session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_futures::cost::CostAccountant;
/// use fleet_futures::domain::TaskRecord;
/// use fleet_futures::{Pricing, ResourceShape, TaskId, TaskStatus, WorkDescriptor};
///
/// let mut accountant = CostAccountant::new(Pricing::default());
/// let mut task = TaskRecord::new(
///     TaskId::from("t"),
///     WorkDescriptor::new("noop", serde_json::Value::Null),
///     ResourceShape::new(1024, 2048),
///     None,
/// );
/// task.status = TaskStatus::Completed;
/// task.started_at = Some(chrono::Utc::now());
/// task.reported_runtime = Some(Duration::from_secs(120));
///
/// let record = accountant.record(&task).unwrap().unwrap();
/// assert_eq!(record.billed_duration, Duration::from_secs(120));
/// assert_eq!(accountant.total(), record.cost);
/// ```
#[derive(Debug, Clone)]
pub struct CostAccountant {
    pricing: Pricing,
    records: Vec<CostRecord>,
    index: HashMap<TaskId, usize>,
    total: f64,
}

impl CostAccountant {
    /// Creates an accountant using `pricing`.
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            records: Vec::new(),
            index: HashMap::new(),
            total: 0.0,
        }
    }

    /// Records the cost of a terminal task.
    ///
    /// Returns `Ok(None)` for a task that never started on a worker. Calling
    /// this again for the same task returns the existing record unchanged.
    ///
    /// # Errors
    ///
    /// [`FleetError::NotResolved`] if the task is not terminal.
    pub fn record(&mut self, task: &TaskRecord) -> Result<Option<CostRecord>, FleetError> {
        if !task.is_terminal() {
            return Err(FleetError::NotResolved {
                task_id: task.id.clone(),
                status: task.status,
            });
        }
        if let Some(&position) = self.index.get(&task.id) {
            return Ok(self.records.get(position).cloned());
        }
        if task.started_at.is_none() {
            return Ok(None);
        }

        let runtime = task.runtime().unwrap_or(Duration::ZERO);
        let billed = self.pricing.billed_duration(runtime);
        let unit_rate = self.pricing.rate_per_second(&task.shape);
        let cost = (unit_rate * billed.as_secs_f64()).max(0.0);

        let record = CostRecord {
            task_id: task.id.clone(),
            status: task.status,
            shape: task.shape,
            runtime,
            billed_duration: billed,
            unit_rate,
            cost,
        };

        self.total += cost;
        self.index.insert(task.id.clone(), self.records.len());
        self.records.push(record.clone());

        tracing::debug!(
            task_id = %task.id,
            status = %task.status,
            billed_ms = billed.as_millis() as u64,
            cost,
            total = self.total,
            "recorded task cost"
        );
        Ok(Some(record))
    }

    /// Sum of all recorded costs.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Records in recording order.
    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }

    /// The record of one task, if it was billed.
    pub fn get(&self, task_id: &TaskId) -> Option<&CostRecord> {
        self.index.get(task_id).and_then(|&i| self.records.get(i))
    }

    /// Snapshot of all records and totals.
    pub fn report(&self) -> CostReport {
        CostReport {
            records: self.records.clone(),
            total_cost: self.total,
            total_billed: self.records.iter().map(|r| r.billed_duration).sum(),
        }
    }

    /// The rates in use.
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::{ResourceShape, TaskStatus, WorkDescriptor};
    use chrono::Utc;

    fn task(id: &str, status: TaskStatus, runtime: Option<Duration>) -> TaskRecord {
        let mut record = TaskRecord::new(
            TaskId::from(id),
            WorkDescriptor::new("noop", serde_json::Value::Null),
            ResourceShape::new(1024, 2048),
            None,
        );
        record.status = status;
        if let Some(runtime) = runtime {
            record.started_at = Some(Utc::now());
            record.reported_runtime = Some(runtime);
        }
        record
    }

    #[test]
    fn non_terminal_task_is_rejected() {
        let mut accountant = CostAccountant::new(Pricing::default());
        let err = accountant
            .record(&task("t", TaskStatus::Running, Some(Duration::from_secs(1))))
            .unwrap_err();
        assert!(matches!(err, FleetError::NotResolved { .. }));
    }

    #[test]
    fn never_started_task_costs_nothing() {
        let mut accountant = CostAccountant::new(Pricing::default());
        assert!(accountant
            .record(&task("t", TaskStatus::Cancelled, None))
            .unwrap()
            .is_none());
        assert_eq!(accountant.total(), 0.0);
    }

    #[test]
    fn failed_task_is_billed_for_actual_runtime() {
        let mut accountant = CostAccountant::new(Pricing::default());
        let record = accountant
            .record(&task("t", TaskStatus::Failed, Some(Duration::from_secs(90))))
            .unwrap()
            .unwrap();
        assert_eq!(record.billed_duration, Duration::from_secs(90));
        assert!(record.cost > 0.0);
    }

    #[test]
    fn recording_twice_does_not_double_count() {
        let mut accountant = CostAccountant::new(Pricing::default());
        let t = task("t", TaskStatus::Completed, Some(Duration::from_secs(61)));
        let first = accountant.record(&t).unwrap().unwrap();
        let second = accountant.record(&t).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(accountant.records().len(), 1);
        assert_eq!(accountant.total(), first.cost);
    }

    #[test]
    fn report_sums_billed_time() {
        let mut accountant = CostAccountant::new(Pricing::default());
        accountant
            .record(&task("a", TaskStatus::Completed, Some(Duration::from_secs(70))))
            .unwrap();
        accountant
            .record(&task("b", TaskStatus::Completed, Some(Duration::from_secs(5))))
            .unwrap();
        let report = accountant.report();
        assert_eq!(report.total_billed, Duration::from_secs(130));
        assert!(report.record(&TaskId::from("b")).is_some());
    }
}
