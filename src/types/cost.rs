//! Billing rates and cost records.
//!
//! Rates follow the Fargate model: a price per vCPU-hour plus a price per
//! GB-hour of memory, billed on a fixed granularity with a minimum charge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::task::{ResourceShape, TaskId, TaskStatus};

/// Billing rates for one worker.
///
/// Defaults are Fargate Linux/x86 on-demand in `us-east-1`:
///
/// | Field            | Default     |
/// |------------------|-------------|
/// | `per_vcpu_hour`  | $0.04048    |
/// | `per_gib_hour`   | $0.004445   |
/// | `granularity`    | 1 s         |
/// | `minimum`        | 60 s        |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Price of one vCPU for one hour.
    pub per_vcpu_hour: f64,
    /// Price of one GiB of memory for one hour.
    pub per_gib_hour: f64,
    /// Billed time is rounded up to a multiple of this.
    pub granularity: Duration,
    /// Minimum billed time for any worker that started.
    pub minimum: Duration,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            per_vcpu_hour: 0.040_48,
            per_gib_hour: 0.004_445,
            granularity: Duration::from_secs(1),
            minimum: Duration::from_secs(60),
        }
    }
}

impl Pricing {
    /// Rounds an observed runtime to the billed duration.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use fleet_futures::Pricing;
    ///
    /// let pricing = Pricing::default();
    /// assert_eq!(pricing.billed_duration(Duration::from_secs(5)), Duration::from_secs(60));
    /// assert_eq!(pricing.billed_duration(Duration::from_millis(90_200)), Duration::from_secs(91));
    /// ```
    pub fn billed_duration(&self, runtime: Duration) -> Duration {
        let rounded = if self.granularity.is_zero() {
            runtime
        } else {
            let step = self.granularity.as_nanos();
            let steps = runtime.as_nanos().div_ceil(step);
            let nanos = steps.saturating_mul(step);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        rounded.max(self.minimum)
    }

    /// Price per billed second for a worker of this shape.
    pub fn rate_per_second(&self, shape: &ResourceShape) -> f64 {
        (shape.vcpus() * self.per_vcpu_hour + shape.memory_gib() * self.per_gib_hour) / 3600.0
    }

    /// Cost of running `shape` for `billed`.
    pub fn cost(&self, shape: &ResourceShape, billed: Duration) -> f64 {
        self.rate_per_second(shape) * billed.as_secs_f64()
    }
}

/// Cost attributed to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// The billed task.
    pub task_id: TaskId,
    /// Terminal status the task reached.
    pub status: TaskStatus,
    /// Requested shape the worker ran with.
    pub shape: ResourceShape,
    /// Observed runtime before rounding.
    pub runtime: Duration,
    /// Runtime after granularity and minimum rounding.
    pub billed_duration: Duration,
    /// Price per billed second.
    pub unit_rate: f64,
    /// `billed_duration * unit_rate`, never negative.
    pub cost: f64,
}

/// Per-task records plus session totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    /// One record per billed task, in recording order.
    pub records: Vec<CostRecord>,
    /// Sum of `cost` across `records`.
    pub total_cost: f64,
    /// Sum of `billed_duration` across `records`.
    pub total_billed: Duration,
}

impl CostReport {
    /// Looks up the record of one task.
    pub fn record(&self, task_id: &TaskId) -> Option<&CostRecord> {
        self.records.iter().find(|r| &r.task_id == task_id)
    }

    /// Sum of costs for tasks that ended in `status`.
    pub fn cost_for_status(&self, status: TaskStatus) -> f64 {
        self.records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.cost)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_rounds_up_to_granularity() {
        let pricing = Pricing {
            minimum: Duration::ZERO,
            ..Pricing::default()
        };
        assert_eq!(pricing.billed_duration(Duration::from_millis(1)), Duration::from_secs(1));
        assert_eq!(pricing.billed_duration(Duration::from_secs(3)), Duration::from_secs(3));
        assert_eq!(pricing.billed_duration(Duration::from_millis(3001)), Duration::from_secs(4));
        assert_eq!(pricing.billed_duration(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn billing_applies_minimum() {
        let pricing = Pricing::default();
        assert_eq!(pricing.billed_duration(Duration::ZERO), Duration::from_secs(60));
    }

    #[test]
    fn zero_granularity_bills_exact_runtime() {
        let pricing = Pricing {
            granularity: Duration::ZERO,
            minimum: Duration::ZERO,
            ..Pricing::default()
        };
        let runtime = Duration::from_millis(1234);
        assert_eq!(pricing.billed_duration(runtime), runtime);
    }

    #[test]
    fn one_vcpu_two_gib_hourly_rate() {
        let pricing = Pricing::default();
        let shape = ResourceShape::new(1024, 2048);
        let hour = pricing.cost(&shape, Duration::from_secs(3600));
        assert!((hour - (0.040_48 + 2.0 * 0.004_445)).abs() < 1e-9);
    }
}
