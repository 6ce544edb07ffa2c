//! Session-scoped cluster plan.
//!
//! A [`ClusterPlan`] is built once through [`ClusterPlan::builder`] and is
//! immutable for the lifetime of the session that owns it. Validation happens
//! at build time, so an invalid quota never reaches admission.
//!
//! # Defaults
//!
//! | Setting               | Default                 |
//! |-----------------------|-------------------------|
//! | quota                 | 4 tasks                 |
//! | worker shape          | 256 CPU units / 512 MiB |
//! | image                 | `fleet-worker:latest`   |
//! | poll interval         | 500 ms                  |
//! | vanish grace          | 30 s                    |
//! | task timeout          | none                    |
//! | launch requeues       | 3                       |
//! | launch timeout        | 120 s                   |
//! | stop timeout          | 30 s                    |
//! | resolve backoff       | 10 ms doubling to 1 s   |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::executor::retry::RetryPolicy;
use crate::types::cost::Pricing;
use crate::types::task::ResourceShape;

/// Default worker image reference.
pub const DEFAULT_IMAGE: &str = "fleet-worker:latest";

/// Default concurrent task quota.
pub const DEFAULT_QUOTA: u32 = 4;

/// Worker shape used when the plan does not name one: 0.25 vCPU, 512 MiB.
pub const DEFAULT_WORKER_SHAPE: ResourceShape = ResourceShape::new(256, 512);

/// What the concurrency quota bounds.
///
/// # Examples
///
/// ```
/// use fleet_futures::{QuotaMode, ResourceShape};
///
/// let small = ResourceShape::new(256, 512);
///
/// let by_count = QuotaMode::Tasks(2);
/// assert!(by_count.admits(1, &small, &small));
/// assert!(!by_count.admits(2, &small, &small));
///
/// let by_units = QuotaMode::Resources(ResourceShape::new(512, 1024));
/// assert!(by_units.admits(1, &small, &small));
/// assert!(!by_units.admits(2, &ResourceShape::new(512, 1024), &small));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaMode {
    /// Maximum number of concurrently admitted tasks.
    Tasks(u32),
    /// Maximum summed shape of concurrently admitted tasks.
    Resources(ResourceShape),
}

impl Default for QuotaMode {
    fn default() -> Self {
        Self::Tasks(DEFAULT_QUOTA)
    }
}

impl fmt::Display for QuotaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tasks(n) => write!(f, "{n} tasks"),
            Self::Resources(shape) => write!(f, "{shape}"),
        }
    }
}

impl QuotaMode {
    /// Returns `true` if a task of shape `candidate` may be admitted while
    /// `occupied` tasks holding `in_use` resources are admitted already.
    pub fn admits(
        &self,
        occupied: usize,
        in_use: &ResourceShape,
        candidate: &ResourceShape,
    ) -> bool {
        match self {
            Self::Tasks(limit) => occupied < *limit as usize,
            Self::Resources(limit) => in_use.saturating_add(candidate).fits_within(limit),
        }
    }

    /// Returns `true` if a task of this shape could ever be admitted.
    pub fn can_ever_admit(&self, shape: &ResourceShape) -> bool {
        match self {
            Self::Tasks(_) => true,
            Self::Resources(limit) => shape.fits_within(limit),
        }
    }

    fn validate(&self) -> Result<(), FleetError> {
        match self {
            Self::Tasks(0) => Err(FleetError::QuotaConfiguration {
                message: "task quota must be at least 1".to_string(),
            }),
            Self::Resources(limit) if limit.cpu_units == 0 || limit.memory_mib == 0 => {
                Err(FleetError::QuotaConfiguration {
                    message: format!("resource quota {limit} must be non-zero in both dimensions"),
                })
            },
            _ => Ok(()),
        }
    }
}

/// Worker supervision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Interval between polls of one worker.
    pub poll_interval: Duration,
    /// How long a worker may stay vanished before the task fails.
    pub vanish_grace: Duration,
    /// Default per-task bound on time spent running. `None` disables it.
    pub task_timeout: Option<Duration>,
    /// How often a task whose launch failed may return to the queue head.
    pub max_launch_requeues: u32,
    /// Bound on one launch call, retries included. A launch still pending
    /// at the bound counts as a transient launch failure.
    pub launch_timeout: Duration,
    /// Bound on one request to stop a worker. The task's slot is never held
    /// while waiting for it.
    pub stop_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            vanish_grace: Duration::from_secs(30),
            task_timeout: None,
            max_launch_requeues: 3,
            launch_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff bounds for `value()` polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveSettings {
    /// First wait between status checks.
    pub initial_backoff: Duration,
    /// Cap on the wait between status checks.
    pub max_backoff: Duration,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Validated, immutable session configuration.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_futures::{ClusterPlan, QuotaMode};
///
/// let plan = ClusterPlan::builder()
///     .quota(2)
///     .image("registry.example.com/worker:1.4")
///     .task_timeout(Duration::from_secs(600))
///     .build()
///     .unwrap();
/// assert_eq!(plan.quota(), QuotaMode::Tasks(2));
///
/// assert!(ClusterPlan::builder().quota(0).build().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPlan {
    quota: QuotaMode,
    worker_shape: ResourceShape,
    image: String,
    executor: ExecutorSettings,
    retry: RetryPolicy,
    pricing: Pricing,
    resolve: ResolveSettings,
}

impl ClusterPlan {
    /// Starts a builder with every default applied.
    pub fn builder() -> ClusterPlanBuilder {
        ClusterPlanBuilder::default()
    }

    /// The concurrency quota.
    pub fn quota(&self) -> QuotaMode {
        self.quota
    }

    /// Default shape of a task that does not request its own.
    pub fn worker_shape(&self) -> ResourceShape {
        self.worker_shape
    }

    /// Worker image reference requested by the plan.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Worker supervision settings.
    pub fn executor(&self) -> &ExecutorSettings {
        &self.executor
    }

    /// Launch retry policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Billing rates.
    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    /// `value()` backoff bounds.
    pub fn resolve(&self) -> &ResolveSettings {
        &self.resolve
    }
}

/// Builder for [`ClusterPlan`].
#[derive(Debug, Clone)]
pub struct ClusterPlanBuilder {
    quota: QuotaMode,
    worker_shape: ResourceShape,
    image: String,
    executor: ExecutorSettings,
    retry: RetryPolicy,
    pricing: Pricing,
    resolve: ResolveSettings,
}

impl Default for ClusterPlanBuilder {
    fn default() -> Self {
        Self {
            quota: QuotaMode::default(),
            worker_shape: DEFAULT_WORKER_SHAPE,
            image: DEFAULT_IMAGE.to_string(),
            executor: ExecutorSettings::default(),
            retry: RetryPolicy::default(),
            pricing: Pricing::default(),
            resolve: ResolveSettings::default(),
        }
    }
}

impl ClusterPlanBuilder {
    /// Bounds the number of concurrently admitted tasks.
    pub fn quota(mut self, tasks: u32) -> Self {
        self.quota = QuotaMode::Tasks(tasks);
        self
    }

    /// Sets the quota mode.
    pub fn quota_mode(mut self, quota: QuotaMode) -> Self {
        self.quota = quota;
        self
    }

    /// Sets the default worker shape.
    pub fn worker_shape(mut self, shape: ResourceShape) -> Self {
        self.worker_shape = shape;
        self
    }

    /// Sets the worker image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Replaces all worker supervision settings.
    pub fn executor(mut self, settings: ExecutorSettings) -> Self {
        self.executor = settings;
        self
    }

    /// Sets the worker poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.executor.poll_interval = interval;
        self
    }

    /// Sets the vanished-worker grace period.
    pub fn vanish_grace(mut self, grace: Duration) -> Self {
        self.executor.vanish_grace = grace;
        self
    }

    /// Sets the default per-task timeout.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.executor.task_timeout = Some(timeout);
        self
    }

    /// Sets how often a failed launch may be requeued.
    pub fn max_launch_requeues(mut self, requeues: u32) -> Self {
        self.executor.max_launch_requeues = requeues;
        self
    }

    /// Sets the bound on one launch call.
    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.executor.launch_timeout = timeout;
        self
    }

    /// Sets the bound on one stop request.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.executor.stop_timeout = timeout;
        self
    }

    /// Sets the launch retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets billing rates.
    pub fn pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Sets `value()` backoff bounds.
    pub fn resolve(mut self, resolve: ResolveSettings) -> Self {
        self.resolve = resolve;
        self
    }

    /// Validates and builds the plan.
    ///
    /// # Errors
    ///
    /// - [`FleetError::QuotaConfiguration`] for a zero quota, a zero worker
    ///   shape, or a resource quota smaller than the worker shape.
    /// - [`FleetError::Config`] for an empty image, a zero poll interval, or
    ///   inverted resolve bounds.
    pub fn build(self) -> Result<ClusterPlan, FleetError> {
        self.quota.validate()?;

        if self.worker_shape.cpu_units == 0 || self.worker_shape.memory_mib == 0 {
            return Err(FleetError::QuotaConfiguration {
                message: format!("worker shape {} must be non-zero", self.worker_shape),
            });
        }
        if !self.quota.can_ever_admit(&self.worker_shape) {
            return Err(FleetError::QuotaConfiguration {
                message: format!(
                    "resource quota {} is smaller than the worker shape {}",
                    self.quota, self.worker_shape
                ),
            });
        }
        if self.image.trim().is_empty() {
            return Err(FleetError::Config("worker image must not be empty".to_string()));
        }
        if self.executor.poll_interval.is_zero() {
            return Err(FleetError::Config("poll interval must be non-zero".to_string()));
        }
        if self.executor.launch_timeout.is_zero() || self.executor.stop_timeout.is_zero() {
            return Err(FleetError::Config(
                "launch and stop timeouts must be non-zero".to_string(),
            ));
        }
        if self.resolve.initial_backoff > self.resolve.max_backoff {
            return Err(FleetError::Config(
                "resolve initial backoff exceeds its maximum".to_string(),
            ));
        }

        Ok(ClusterPlan {
            quota: self.quota,
            worker_shape: self.worker_shape,
            image: self.image,
            executor: self.executor,
            retry: self.retry,
            pricing: self.pricing,
            resolve: self.resolve,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let plan = ClusterPlan::builder().build().unwrap();
        assert_eq!(plan.quota(), QuotaMode::Tasks(4));
        assert_eq!(plan.worker_shape(), ResourceShape::new(256, 512));
        assert_eq!(plan.image(), DEFAULT_IMAGE);
        assert_eq!(plan.executor().max_launch_requeues, 3);
        assert!(plan.executor().task_timeout.is_none());
    }

    #[test]
    fn zero_task_quota_is_rejected() {
        let err = ClusterPlan::builder().quota(0).build().unwrap_err();
        assert!(matches!(err, FleetError::QuotaConfiguration { .. }));
    }

    #[test]
    fn zero_resource_quota_is_rejected() {
        let err = ClusterPlan::builder()
            .quota_mode(QuotaMode::Resources(ResourceShape::new(1024, 0)))
            .build()
            .unwrap_err();
        assert!(matches!(err, FleetError::QuotaConfiguration { .. }));
    }

    #[test]
    fn resource_quota_smaller_than_worker_is_rejected() {
        let err = ClusterPlan::builder()
            .quota_mode(QuotaMode::Resources(ResourceShape::new(128, 4096)))
            .worker_shape(ResourceShape::new(256, 512))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("smaller than the worker shape"));
    }

    #[test]
    fn zero_worker_shape_is_rejected() {
        let err = ClusterPlan::builder()
            .worker_shape(ResourceShape::new(0, 512))
            .build()
            .unwrap_err();
        assert_eq!(err.classification(), "configuration");
    }

    #[test]
    fn empty_image_is_a_config_error() {
        let err = ClusterPlan::builder().image("  ").build().unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn inverted_resolve_bounds_are_rejected() {
        let err = ClusterPlan::builder()
            .resolve(ResolveSettings {
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(1),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn zero_launch_timeout_is_rejected() {
        let err = ClusterPlan::builder()
            .launch_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn resource_quota_admission_is_knapsack_style() {
        let quota = QuotaMode::Resources(ResourceShape::new(1024, 2048));
        let big = ResourceShape::new(768, 1024);
        let small = ResourceShape::new(256, 512);
        assert!(quota.admits(0, &ResourceShape::zero(), &big));
        assert!(quota.admits(1, &big, &small));
        assert!(!quota.admits(1, &big, &big));
        assert!(!quota.can_ever_admit(&ResourceShape::new(2048, 512)));
    }
}
