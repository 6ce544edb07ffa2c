//! AWS ECS/Fargate executor.
//!
//! [`EcsExecutor`] implements [`RemoteExecutor`] with one Fargate task per
//! work unit:
//!
//! | Operation | ECS API         | Notes                                          |
//! |-----------|-----------------|------------------------------------------------|
//! | `launch`  | `RunTask`       | `count = 1`, awsvpc networking, env overrides  |
//! | `poll`    | `DescribeTasks` | `STOPPED` + exit code 0 is success             |
//! | `cancel`  | `StopTask`      | idempotent on the ECS side                     |
//!
//! The launch request's image is used as the task definition. The worker
//! container receives the task identifier and the store keys of its
//! descriptor and result through environment variables:
//!
//! | Variable               | Value             |
//! |------------------------|-------------------|
//! | `FLEET_TASK_ID`        | task identifier   |
//! | `FLEET_DESCRIPTOR_KEY` | `tasks/{id}`      |
//! | `FLEET_RESULT_KEY`     | `results/{id}`    |
//!
//! The worker writes its outcome to the result key itself; a successful
//! poll only reports where to find it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_futures::executor::ecs::EcsExecutor;
//!
//! # async fn example() {
//! let executor = EcsExecutor::from_env("batch-cluster", "worker").await;
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ecs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, ContainerOverride, Failure, KeyValuePair, LaunchType,
    NetworkConfiguration, Task, TaskOverride,
};
use aws_sdk_ecs::Client;

use super::{ExecutorError, LaunchRequest, PollStatus, RemoteExecutor, WorkerHandle};
use crate::store::backend::{descriptor_key, result_key};

/// Error codes ECS returns for conditions that clear up on their own.
const TRANSIENT_CODES: &[&str] = &[
    "ThrottlingException",
    "ServerException",
    "ServiceUnavailableException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Launches work units as Fargate tasks.
#[derive(Debug, Clone)]
pub struct EcsExecutor {
    client: Client,
    cluster: String,
    container: String,
    started_by: String,
}

impl EcsExecutor {
    /// Creates an executor with a pre-built ECS client.
    ///
    /// `container` names the container in the task definition that receives
    /// the environment overrides.
    pub fn new(client: Client, cluster: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            container: container.into(),
            started_by: "fleet-futures".to_string(),
        }
    }

    /// Creates an executor using the standard AWS SDK config chain.
    pub async fn from_env(cluster: impl Into<String>, container: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), cluster, container)
    }

    /// Sets the `startedBy` tag put on launched tasks.
    pub fn with_started_by(mut self, started_by: impl Into<String>) -> Self {
        self.started_by = started_by.into();
        self
    }

    /// The cluster tasks run in.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn network(&self, request: &LaunchRequest) -> Result<NetworkConfiguration, ExecutorError> {
        let infra = &request.infra;
        let assign = if infra.assign_public_ip {
            AssignPublicIp::Enabled
        } else {
            AssignPublicIp::Disabled
        };
        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(infra.subnets.clone()))
            .set_security_groups(Some(infra.security_groups.clone()))
            .assign_public_ip(assign)
            .build()
            .map_err(|e| ExecutorError::fatal(format!("invalid network configuration: {e}")))?;
        Ok(NetworkConfiguration::builder().awsvpc_configuration(vpc).build())
    }

    fn overrides(&self, request: &LaunchRequest) -> TaskOverride {
        let id = request.task_id.as_str();
        let env = [
            ("FLEET_TASK_ID", id.to_string()),
            ("FLEET_DESCRIPTOR_KEY", descriptor_key(id)),
            ("FLEET_RESULT_KEY", result_key(id)),
        ];
        let mut container = ContainerOverride::builder().name(&self.container);
        for (name, value) in env {
            container =
                container.environment(KeyValuePair::builder().name(name).value(value).build());
        }

        let mut task = TaskOverride::builder()
            .container_overrides(container.build())
            .cpu(request.shape.cpu_units.to_string())
            .memory(request.shape.memory_mib.to_string());
        if let Some(role) = &request.infra.execution_role {
            task = task.execution_role_arn(role);
        }
        if let Some(role) = &request.infra.task_role {
            task = task.task_role_arn(role);
        }
        task.build()
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Classifies an SDK error. Transport problems and throttling are transient;
/// everything the service rejected outright is fatal.
fn classify_sdk_error<E, R>(err: SdkError<E, R>, op: &str) -> ExecutorError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            format!("{}: {}", inner.code().unwrap_or("unknown"), inner.message().unwrap_or(""))
        },
        other => other.to_string(),
    };
    let message = format!("ECS {op} failed: {detail}");
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ExecutorError::transient(message)
        },
        SdkError::ServiceError(service)
            if service.err().code().is_some_and(|code| TRANSIENT_CODES.contains(&code)) =>
        {
            ExecutorError::transient(message)
        },
        _ => ExecutorError::fatal(message),
    }
}

/// Classifies a `RunTask` placement failure. Capacity shortages are
/// transient; anything else (missing task definition, bad parameters) is
/// fatal.
fn classify_run_failure(failure: &Failure) -> ExecutorError {
    let reason = failure.reason().unwrap_or("unknown");
    let message = format!(
        "RunTask failure: {reason}{}",
        failure.detail().map(|d| format!(" ({d})")).unwrap_or_default()
    );
    if reason.starts_with("RESOURCE") || reason.contains("AGENT") || reason.contains("Capacity") {
        ExecutorError::transient(message)
    } else {
        ExecutorError::fatal(message)
    }
}

fn runtime_of(task: &Task) -> Option<Duration> {
    let started = task.started_at()?.to_millis().ok()?;
    let stopped = task.stopped_at()?.to_millis().ok()?;
    u64::try_from(stopped - started).ok().map(Duration::from_millis)
}

/// Interprets a described task.
fn poll_status(task: &Task, task_id: &str) -> PollStatus {
    if task.last_status() != Some("STOPPED") {
        return PollStatus::Running;
    }
    let runtime = runtime_of(task);
    let exit_code = task.containers().first().and_then(|c| c.exit_code());
    match exit_code {
        Some(0) => PollStatus::Succeeded {
            result_ref: result_key(task_id),
            runtime,
        },
        Some(code) => {
            let reason = task
                .containers()
                .first()
                .and_then(|c| c.reason())
                .or(task.stopped_reason())
                .unwrap_or("no reason given");
            PollStatus::Failed {
                message: format!("worker exited with code {code}: {reason}"),
                runtime,
            }
        },
        None => PollStatus::Failed {
            message: format!(
                "worker stopped before its container exited: {}",
                task.stopped_reason().unwrap_or("no reason given")
            ),
            runtime,
        },
    }
}

// ---------------------------------------------------------------------------
// RemoteExecutor implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl RemoteExecutor for EcsExecutor {
    async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError> {
        let network = self.network(request)?;
        let output = self
            .client
            .run_task()
            .cluster(&self.cluster)
            .task_definition(&request.image)
            .launch_type(LaunchType::Fargate)
            .count(1)
            .started_by(&self.started_by)
            .network_configuration(network)
            .overrides(self.overrides(request))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, "RunTask"))?;

        if let Some(failure) = output.failures().first() {
            return Err(classify_run_failure(failure));
        }
        let arn = output
            .tasks()
            .first()
            .and_then(|task| task.task_arn())
            .ok_or_else(|| ExecutorError::transient("RunTask returned no task"))?;

        tracing::debug!(
            task_id = %request.task_id,
            worker = arn,
            cluster = %self.cluster,
            "fargate task started"
        );
        Ok(WorkerHandle::new(arn, request.task_id.clone()))
    }

    async fn poll(&self, worker: &WorkerHandle) -> Result<PollStatus, ExecutorError> {
        let output = self
            .client
            .describe_tasks()
            .cluster(&self.cluster)
            .tasks(&worker.worker_id)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, "DescribeTasks"))?;

        match output.tasks().first() {
            Some(task) => Ok(poll_status(task, worker.task_id.as_str())),
            None => {
                if let Some(failure) = output.failures().first() {
                    tracing::debug!(
                        task_id = %worker.task_id,
                        worker = %worker.worker_id,
                        reason = failure.reason().unwrap_or("unknown"),
                        "task not described"
                    );
                }
                Ok(PollStatus::Vanished)
            },
        }
    }

    async fn cancel(&self, worker: &WorkerHandle) -> Result<(), ExecutorError> {
        self.client
            .stop_task()
            .cluster(&self.cluster)
            .task(&worker.worker_id)
            .reason("cancelled by fleet session")
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, "StopTask"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_ecs::primitives::DateTime;
    use aws_sdk_ecs::types::Container;

    use super::*;

    fn stopped(exit_code: Option<i32>) -> Task {
        let mut container = Container::builder();
        if let Some(code) = exit_code {
            container = container.exit_code(code);
        }
        Task::builder()
            .last_status("STOPPED")
            .stopped_reason("Essential container in task exited")
            .started_at(DateTime::from_secs(1_000))
            .stopped_at(DateTime::from_secs(1_090))
            .containers(container.build())
            .build()
    }

    #[test]
    fn running_task_polls_running() {
        let task = Task::builder().last_status("RUNNING").build();
        assert_eq!(poll_status(&task, "t-1"), PollStatus::Running);
    }

    #[test]
    fn zero_exit_is_success_with_runtime() {
        assert_eq!(
            poll_status(&stopped(Some(0)), "t-1"),
            PollStatus::Succeeded {
                result_ref: "results/t-1".to_string(),
                runtime: Some(Duration::from_secs(90)),
            }
        );
    }

    #[test]
    fn nonzero_exit_is_failure() {
        match poll_status(&stopped(Some(3)), "t-1") {
            PollStatus::Failed { message, runtime } => {
                assert!(message.contains("code 3"));
                assert_eq!(runtime, Some(Duration::from_secs(90)));
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stop_without_exit_code_is_failure() {
        assert!(matches!(
            poll_status(&stopped(None), "t-1"),
            PollStatus::Failed { .. }
        ));
    }

    #[test]
    fn capacity_failures_are_transient() {
        let failure = Failure::builder().reason("RESOURCE:MEMORY").build();
        assert!(classify_run_failure(&failure).is_transient());

        let failure = Failure::builder().reason("MISSING").build();
        assert!(classify_run_failure(&failure).is_fatal());
    }
}
