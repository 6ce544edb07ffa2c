//! Plan configuration from TOML and the environment.
//!
//! Configuration can be loaded from:
//! 1. A TOML file (`fleet.toml` by default)
//! 2. Environment variables (with `FLEET_` prefix)
//!
//! Environment variables override TOML configuration. Every field has a
//! default, so an empty file is a valid configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [plan]
//! quota = 8
//! image = "123456789012.dkr.ecr.us-east-1.amazonaws.com/worker:2"
//!
//! [plan.worker]
//! cpu_units = 1024
//! memory_mib = 2048
//!
//! [plan.executor]
//! poll_interval_ms = 1000
//! task_timeout_ms = 900000
//!
//! [plan.retry]
//! max_attempts = 3
//! ```
//!
//! Setting both `quota_cpu_units` and `quota_memory_mib` switches the plan to
//! a resource quota and `quota` is ignored.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::executor::retry::RetryPolicy;
use crate::types::cost::Pricing;
use crate::types::plan::{
    ClusterPlan, ExecutorSettings, QuotaMode, ResolveSettings, DEFAULT_IMAGE, DEFAULT_QUOTA,
    DEFAULT_WORKER_SHAPE,
};
use crate::types::task::ResourceShape;

/// File read by [`FleetConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "fleet.toml";

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// The `[plan]` table.
    pub plan: PlanConfig,
}

/// Serialized form of a [`ClusterPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Maximum concurrent tasks.
    pub quota: u32,
    /// CPU budget of a resource quota.
    pub quota_cpu_units: Option<u32>,
    /// Memory budget of a resource quota.
    pub quota_memory_mib: Option<u32>,
    /// Worker image reference.
    pub image: String,
    /// Default worker shape.
    pub worker: WorkerConfig,
    /// Polling and timeout settings.
    pub executor: ExecutorConfig,
    /// Launch and cancel retry policy.
    pub retry: RetryConfig,
    /// Billing rates.
    pub pricing: PricingConfig,
    /// `value()` polling backoff.
    pub resolve: ResolveConfig,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            quota_cpu_units: None,
            quota_memory_mib: None,
            image: DEFAULT_IMAGE.to_string(),
            worker: WorkerConfig::default(),
            executor: ExecutorConfig::default(),
            retry: RetryConfig::default(),
            pricing: PricingConfig::default(),
            resolve: ResolveConfig::default(),
        }
    }
}

/// `[plan.worker]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// CPU units (1024 per vCPU).
    pub cpu_units: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cpu_units: DEFAULT_WORKER_SHAPE.cpu_units,
            memory_mib: DEFAULT_WORKER_SHAPE.memory_mib,
        }
    }
}

/// `[plan.executor]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Vanish grace period in milliseconds.
    pub vanish_grace_ms: u64,
    /// Default task timeout in milliseconds.
    pub task_timeout_ms: Option<u64>,
    /// Launch requeue limit.
    pub max_launch_requeues: u32,
    /// Launch call bound in milliseconds.
    pub launch_timeout_ms: u64,
    /// Stop request bound in milliseconds.
    pub stop_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let settings = ExecutorSettings::default();
        Self {
            poll_interval_ms: millis(settings.poll_interval),
            vanish_grace_ms: millis(settings.vanish_grace),
            task_timeout_ms: settings.task_timeout.map(millis),
            max_launch_requeues: settings.max_launch_requeues,
            launch_timeout_ms: millis(settings.launch_timeout),
            stop_timeout_ms: millis(settings.stop_timeout),
        }
    }
}

/// `[plan.retry]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per launch or cancel call, including the first.
    pub max_attempts: u32,
    /// First backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between attempts.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: millis(policy.initial_backoff),
            max_backoff_ms: millis(policy.max_backoff),
            multiplier: policy.multiplier,
        }
    }
}

/// `[plan.pricing]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Price per vCPU-hour.
    pub per_vcpu_hour: f64,
    /// Price per GiB-hour.
    pub per_gib_hour: f64,
    /// Billing granularity in seconds.
    pub granularity_secs: u64,
    /// Minimum billed time in seconds.
    pub minimum_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let pricing = Pricing::default();
        Self {
            per_vcpu_hour: pricing.per_vcpu_hour,
            per_gib_hour: pricing.per_gib_hour,
            granularity_secs: pricing.granularity.as_secs(),
            minimum_secs: pricing.minimum.as_secs(),
        }
    }
}

/// `[plan.resolve]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// First status-check wait in milliseconds.
    pub initial_backoff_ms: u64,
    /// Status-check wait cap in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        let resolve = ResolveSettings::default();
        Self {
            initial_backoff_ms: millis(resolve.initial_backoff),
            max_backoff_ms: millis(resolve.max_backoff),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl FleetConfig {
    /// Load configuration from [`DEFAULT_CONFIG_FILE`] and the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    pub fn load() -> Result<Self, FleetError> {
        let mut config = match std::fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply the
    /// environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, FleetError> {
        toml::from_str(content)
            .map_err(|e| FleetError::Config(format!("invalid configuration: {e}")))
    }

    /// Apply `FLEET_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Values that fail to
    /// parse are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let plan = &mut self.plan;

        if let Some(v) = parsed(&lookup, "FLEET_QUOTA") {
            plan.quota = v;
        }
        if let Some(image) = lookup("FLEET_IMAGE") {
            plan.image = image;
        }
        if let Some(v) = parsed(&lookup, "FLEET_WORKER_CPU") {
            plan.worker.cpu_units = v;
        }
        if let Some(v) = parsed(&lookup, "FLEET_WORKER_MEMORY") {
            plan.worker.memory_mib = v;
        }
        if let Some(v) = parsed(&lookup, "FLEET_TASK_TIMEOUT_MS") {
            plan.executor.task_timeout_ms = Some(v);
        }
        if let Some(v) = parsed(&lookup, "FLEET_POLL_INTERVAL_MS") {
            plan.executor.poll_interval_ms = v;
        }
    }

    /// Validates the configuration into a [`ClusterPlan`].
    pub fn into_plan(self) -> Result<ClusterPlan, FleetError> {
        let plan = self.plan;
        let quota = match (plan.quota_cpu_units, plan.quota_memory_mib) {
            (Some(cpu_units), Some(memory_mib)) => {
                QuotaMode::Resources(ResourceShape::new(cpu_units, memory_mib))
            },
            (None, None) => QuotaMode::Tasks(plan.quota),
            _ => {
                return Err(FleetError::Config(
                    "quota_cpu_units and quota_memory_mib must be set together".to_string(),
                ))
            },
        };

        ClusterPlan::builder()
            .quota_mode(quota)
            .image(plan.image)
            .worker_shape(ResourceShape::new(plan.worker.cpu_units, plan.worker.memory_mib))
            .executor(ExecutorSettings {
                poll_interval: Duration::from_millis(plan.executor.poll_interval_ms),
                vanish_grace: Duration::from_millis(plan.executor.vanish_grace_ms),
                task_timeout: plan.executor.task_timeout_ms.map(Duration::from_millis),
                max_launch_requeues: plan.executor.max_launch_requeues,
                launch_timeout: Duration::from_millis(plan.executor.launch_timeout_ms),
                stop_timeout: Duration::from_millis(plan.executor.stop_timeout_ms),
            })
            .retry(RetryPolicy {
                max_attempts: plan.retry.max_attempts,
                initial_backoff: Duration::from_millis(plan.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(plan.retry.max_backoff_ms),
                multiplier: plan.retry.multiplier,
            })
            .pricing(Pricing {
                per_vcpu_hour: plan.pricing.per_vcpu_hour,
                per_gib_hour: plan.pricing.per_gib_hour,
                granularity: Duration::from_secs(plan.pricing.granularity_secs),
                minimum: Duration::from_secs(plan.pricing.minimum_secs),
            })
            .resolve(ResolveSettings {
                initial_backoff: Duration::from_millis(plan.resolve.initial_backoff_ms),
                max_backoff: Duration::from_millis(plan.resolve.max_backoff_ms),
            })
            .build()
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration override");
            None
        },
    }
}
