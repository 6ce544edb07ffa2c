//! Fleet session: the single owner of registry, wave queue and cost state.
//!
//! A [`Session`] is created from a validated [`ClusterPlan`] through
//! [`Session::builder`]. It resolves the worker image and infrastructure
//! handles once, then turns caller operations (submit, value, cancel) into
//! registry transitions, wave admissions and executor calls.
//!
//! # Single Writer
//!
//! Registry, [`PlanState`] and the cost accountant live together behind one
//! mutex. Every admission decision, status change and slot release happens
//! inside one critical section, and the lock is never held across an
//! `.await`. Executor calls (launch, poll, cancel) run outside the lock on
//! tasks spawned into the session's [`TaskTracker`], so a slow poll never
//! delays admission of other tasks.
//!
//! # Launch Lifecycle
//!
//! ```text
//! submit ─► registry: pending ─► queue tail ─► advance()
//!                                                │ slot reserved (Launching)
//!                                                ▼
//!                                   executor.launch (with retries)
//!                     ok │                               │ err
//!                        ▼                               ▼
//!   registry: running, monitor spawned       transient: slot released,
//!                                            task back at queue head
//!                                            fatal / requeues spent:
//!                                            registry: failed
//! ```
//!
//! Every path that frees a slot calls `advance()` again, which is what makes
//! waves progress without any external trigger.

pub mod future;
mod monitor;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cost::CostAccountant;
use crate::domain::TaskRecord;
use crate::error::FleetError;
use crate::executor::retry::{Backoff, RetryingExecutor};
use crate::executor::{ExecutorError, LaunchRequest, RemoteExecutor, WorkerHandle};
use crate::provision::{
    ImageProvider, ImageReference, InfraHandles, InfraProvisioner, PreprovisionedInfra,
    StaticImage,
};
use crate::queue::{Advance, PlanState, Wave};
use crate::registry::{Registration, TaskRegistry};
use crate::store::{InMemoryResultStore, ResultStore, StorageError};
use crate::types::cost::CostReport;
use crate::types::plan::ClusterPlan;
use crate::types::task::{
    FailureKind, ResourceShape, TaskFailure, TaskId, TaskOutcome, TaskStatus, WorkDescriptor,
};

pub use future::{FleetFuture, FutureBackend, MapPolicy};

/// Per-task overrides for [`Session::submit_with`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_futures::session::SubmitOptions;
/// use fleet_futures::{ResourceShape, TaskId};
///
/// let options = SubmitOptions::default()
///     .with_id(TaskId::from("frame-0001"))
///     .with_shape(ResourceShape::new(1024, 2048))
///     .with_timeout(Duration::from_secs(900));
/// assert_eq!(options.id, Some(TaskId::from("frame-0001")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Explicit identifier. Re-submitting an identifier returns the existing
    /// task untouched.
    pub id: Option<TaskId>,
    /// Requested shape, instead of the plan's worker shape.
    pub shape: Option<ResourceShape>,
    /// Timeout, instead of the plan's default.
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    /// Sets the identifier.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the requested shape.
    pub fn with_shape(mut self, shape: ResourceShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Sets the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What [`Session::shutdown`] does with unresolved tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let queued and running tasks finish first.
    Drain,
    /// Cancel every unresolved task, stopping its remote worker.
    CancelOutstanding,
}

/// How a monitor observed a running task end.
#[derive(Debug)]
pub(crate) enum Finish {
    Completed {
        result_ref: String,
        runtime: Option<Duration>,
    },
    Failed {
        failure: TaskFailure,
        runtime: Option<Duration>,
    },
}

struct SessionState {
    registry: TaskRegistry,
    plan: PlanState,
    accountant: CostAccountant,
    monitors: HashMap<TaskId, CancellationToken>,
    closed: bool,
}

pub(crate) struct SessionInner {
    plan: ClusterPlan,
    image: ImageReference,
    infra: InfraHandles,
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn ResultStore>,
    state: Mutex<SessionState>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl SessionInner {
    /// Admits what the quota allows and spawns one launch per admitted task.
    fn advance(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let requests = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Advance { state: next, wave } = state.plan.advance(&self.plan.quota(), Utc::now());
            state.plan = next;
            let Some(wave) = wave else {
                return;
            };
            tracing::info!(
                wave = wave.index,
                admitted = wave.members.len(),
                occupied = state.plan.occupied_count(),
                pending = state.plan.pending_count(),
                quota = %self.plan.quota(),
                "admitted wave"
            );
            self.launch_requests(state, &wave)
        };

        for request in requests {
            let inner = Arc::clone(self);
            self.tracker
                .spawn_on(async move { inner.launch(request).await }, &self.runtime);
        }
    }

    fn launch_requests(&self, state: &mut SessionState, wave: &Wave) -> Vec<LaunchRequest> {
        let mut requests = Vec::with_capacity(wave.members.len());
        for id in &wave.members {
            let attempt = match state.registry.record_launch_attempt(id, wave.index) {
                Ok(attempt) => attempt,
                Err(err) => {
                    tracing::error!(
                        task_id = %id,
                        error = %err,
                        "admitted task missing from registry"
                    );
                    let (next, _) = state.plan.release(id);
                    state.plan = next;
                    continue;
                },
            };
            if let Ok(record) = state.registry.get(id) {
                tracing::debug!(task_id = %id, wave = wave.index, attempt, "launching task");
                requests.push(
                    LaunchRequest::new(
                        id.clone(),
                        record.descriptor.clone(),
                        record.shape,
                        self.image.uri.clone(),
                    )
                    .with_infra(self.infra.clone()),
                );
            }
        }
        requests
    }

    async fn launch(self: Arc<Self>, request: LaunchRequest) {
        if let Err(err) = self
            .store
            .put_descriptor(&request.task_id, &request.descriptor)
            .await
        {
            if !matches!(err, StorageError::AlreadyExists { .. }) {
                let err = ExecutorError::transient(format!("failed to stage descriptor: {err}"));
                self.launch_failed(&request.task_id, &err);
                return;
            }
        }

        let bound = self.plan.executor().launch_timeout;
        let launched = tokio::time::timeout(bound, self.executor.launch(&request)).await;
        match launched {
            Ok(Ok(worker)) => self.launched(worker).await,
            Ok(Err(err)) => self.launch_failed(&request.task_id, &err),
            Err(_) => {
                let err = ExecutorError::transient(format!(
                    "launch did not return within {}ms",
                    bound.as_millis()
                ));
                self.launch_failed(&request.task_id, &err);
            },
        }
    }

    /// Asks the executor to stop `worker`, giving up after the plan's stop
    /// timeout. Callers release the task's slot before calling this.
    pub(crate) async fn stop_worker(&self, worker: &WorkerHandle) {
        let bound = self.plan.executor().stop_timeout;
        match tokio::time::timeout(bound, self.executor.cancel(worker)).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::warn!(
                    task_id = %worker.task_id,
                    worker = %worker.worker_id,
                    error = %err,
                    "failed to stop worker"
                );
            },
            Err(_) => {
                tracing::warn!(
                    task_id = %worker.task_id,
                    worker = %worker.worker_id,
                    timeout_ms = bound.as_millis() as u64,
                    "stop request did not return in time"
                );
            },
        }
    }

    async fn launched(self: Arc<Self>, worker: WorkerHandle) {
        let id = worker.task_id.clone();
        let monitor = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let admitted = state.plan.is_occupied(&id)
                && matches!(state.registry.status(&id), Ok(TaskStatus::Pending));
            if admitted {
                match state.registry.mark_running(&id, worker.clone()) {
                    Ok(record) => {
                        let timeout = record.timeout;
                        state.plan = state.plan.mark_running(&id);
                        let token = self.shutdown.child_token();
                        state.monitors.insert(id.clone(), token.clone());
                        tracing::info!(
                            task_id = %id,
                            worker = %worker.worker_id,
                            occupied = state.plan.occupied_count(),
                            "task running"
                        );
                        Some((token, timeout))
                    },
                    Err(err) => {
                        tracing::error!(task_id = %id, error = %err, "could not mark task running");
                        None
                    },
                }
            } else {
                None
            }
        };

        match monitor {
            Some((token, timeout)) => {
                let inner = Arc::clone(&self);
                self.tracker.spawn_on(
                    monitor::watch(inner, worker, timeout, token),
                    &self.runtime,
                );
            },
            None => {
                tracing::info!(
                    task_id = %id,
                    worker = %worker.worker_id,
                    "task cancelled during launch, stopping worker"
                );
                self.stop_worker(&worker).await;
            },
        }
    }

    fn launch_failed(self: &Arc<Self>, id: &TaskId, err: &ExecutorError) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let launching = state.plan.is_occupied(id)
                && matches!(state.registry.status(id), Ok(TaskStatus::Pending));
            if !launching {
                return;
            }

            let attempts = state.registry.get(id).map(|r| r.launch_attempts).unwrap_or(0);
            let max_requeues = self.plan.executor().max_launch_requeues;
            if !err.is_fatal() && attempts <= max_requeues {
                state.plan = state.plan.requeue_front(id);
                tracing::warn!(
                    task_id = %id,
                    attempt = attempts,
                    error = %err,
                    "launch failed, task requeued at queue head"
                );
            } else {
                let (next, _) = state.plan.release(id);
                state.plan = next;
                let kind = if err.is_fatal() {
                    FailureKind::FatalLaunch
                } else {
                    FailureKind::TransientInfra
                };
                if let Err(mark_err) =
                    state
                        .registry
                        .mark_failed(id, TaskFailure::new(kind, err.to_string()), None)
                {
                    tracing::error!(task_id = %id, error = %mark_err, "could not mark task failed");
                }
                tracing::error!(
                    task_id = %id,
                    attempt = attempts,
                    error = %err,
                    "launch failed permanently"
                );
            }
        }
        self.advance();
    }

    /// Applies a terminal report from a monitor. Returns `false` if the task
    /// was already terminal and the report was discarded.
    pub(crate) fn finish(self: &Arc<Self>, id: &TaskId, finish: Finish) -> bool {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.registry.status(id) {
                Ok(status) if status.is_terminal() => {
                    tracing::warn!(task_id = %id, %status, "late completion report discarded");
                    return false;
                },
                Ok(_) => {},
                Err(_) => return false,
            }

            let marked = match finish {
                Finish::Completed {
                    result_ref,
                    runtime,
                } => state.registry.mark_completed(id, result_ref, runtime),
                Finish::Failed { failure, runtime } => {
                    state.registry.mark_failed(id, failure, runtime)
                },
            };
            let record = match marked {
                Ok(record) => record.clone(),
                Err(err) => {
                    tracing::warn!(task_id = %id, error = %err, "terminal report rejected");
                    return false;
                },
            };

            let (next, released) = state.plan.release(id);
            state.plan = next;
            state.monitors.remove(id);
            if let Err(err) = state.accountant.record(&record) {
                tracing::warn!(task_id = %id, error = %err, "cost not recorded");
            }
            tracing::info!(
                task_id = %id,
                status = %record.status,
                released,
                occupied = state.plan.occupied_count(),
                "task finished"
            );
        }
        self.advance();
        true
    }
}

/// A scheduling session over one cluster plan.
///
/// Cloning a `Session` is cheap; all clones share the same state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use fleet_futures::executor::local::LocalExecutor;
/// use fleet_futures::store::{InMemoryResultStore, ResultStore};
/// use fleet_futures::{ClusterPlan, Session, WorkDescriptor};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), fleet_futures::FleetError> {
/// let store: Arc<dyn ResultStore> = Arc::new(InMemoryResultStore::new());
/// let fleet = LocalExecutor::new(store.clone())
///     .with_function("square", Duration::from_millis(5), |args| {
///         let n = args.as_i64().ok_or("expected an integer")?;
///         Ok(json!(n * n))
///     });
///
/// let plan = ClusterPlan::builder().quota(2).poll_interval(Duration::from_millis(5)).build()?;
/// let session = Session::builder(plan).executor(fleet).store(store).build().await?;
///
/// let future = session.submit(WorkDescriptor::new("square", json!(7)))?;
/// assert_eq!(future.value().await?, json!(49));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("quota", &self.inner.plan.quota())
            .field("image", &self.inner.image.uri)
            .field("occupied", &self.running_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Session {
    /// Starts building a session for `plan`.
    pub fn builder(plan: ClusterPlan) -> SessionBuilder {
        SessionBuilder::new(plan)
    }

    // ---- Resolution operations ----

    /// Submits a work unit with the plan's default shape and timeout.
    pub fn submit(&self, work: WorkDescriptor) -> Result<FleetFuture, FleetError> {
        self.submit_with(work, SubmitOptions::default())
    }

    /// Submits a work unit with per-task overrides.
    ///
    /// Registers the task, appends it to the queue and immediately runs
    /// admission.
    ///
    /// # Errors
    ///
    /// - [`FleetError::SessionClosed`] after [`shutdown`](Self::shutdown).
    /// - [`FleetError::ShapeExceedsQuota`] if the shape can never fit a
    ///   resource quota.
    pub fn submit_with(
        &self,
        work: WorkDescriptor,
        options: SubmitOptions,
    ) -> Result<FleetFuture, FleetError> {
        let plan = &self.inner.plan;
        let id = options.id.unwrap_or_default();
        let shape = options.shape.unwrap_or_else(|| plan.worker_shape());
        if !plan.quota().can_ever_admit(&shape) {
            return Err(FleetError::ShapeExceedsQuota {
                task_id: id,
                message: format!("requested {shape}, quota is {}", plan.quota()),
            });
        }
        let timeout = options.timeout.or(plan.executor().task_timeout);

        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(FleetError::SessionClosed);
            }
            match state.registry.register(id.clone(), work, shape, timeout) {
                Registration::Created => {
                    state.plan = state.plan.enqueue(id.clone(), shape);
                    tracing::debug!(
                        task_id = %id,
                        %shape,
                        pending = state.plan.pending_count(),
                        "task queued"
                    );
                },
                Registration::Existing => {
                    tracing::debug!(task_id = %id, "task already registered");
                },
            }
        }

        self.inner.advance();
        Ok(FleetFuture::new(id, self.clone()))
    }

    /// Returns `true` if the task reached a terminal status.
    pub fn is_resolved(&self, id: &TaskId) -> Result<bool, FleetError> {
        self.status(id).map(|status| status.is_terminal())
    }

    /// Waits for the task to become terminal and returns its value.
    ///
    /// Waiting polls the registry with capped exponential backoff.
    ///
    /// # Errors
    ///
    /// The task's recorded failure with its original classification,
    /// [`FleetError::Cancelled`] for a cancelled task, or
    /// [`FleetError::UnknownTask`].
    pub async fn value(&self, id: &TaskId) -> Result<Value, FleetError> {
        let resolve = self.inner.plan.resolve();
        let mut backoff = Backoff::new(resolve.initial_backoff, resolve.max_backoff, 2.0);
        while !self.status(id)?.is_terminal() {
            tokio::time::sleep(backoff.next_delay()).await;
        }

        let record = self.task(id)?;
        match record.status {
            TaskStatus::Completed => match self.inner.store.get(id).await? {
                TaskOutcome::Success { value } => Ok(value),
                TaskOutcome::Failure { failure } => Err(FleetError::from_failure(id, &failure)),
            },
            TaskStatus::Failed => {
                let failure = record.failure.unwrap_or_else(|| {
                    TaskFailure::new(FailureKind::Runtime, "task failed without a recorded error")
                });
                Err(FleetError::from_failure(id, &failure))
            },
            TaskStatus::Cancelled => Err(FleetError::Cancelled {
                task_id: id.clone(),
            }),
            status @ (TaskStatus::Pending | TaskStatus::Running) => Err(FleetError::NotResolved {
                task_id: id.clone(),
                status,
            }),
        }
    }

    /// Waits for the task and deserializes its value.
    pub async fn value_as<T: DeserializeOwned>(&self, id: &TaskId) -> Result<T, FleetError> {
        let value = self.value(id).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Cancels a task.
    ///
    /// A queued task leaves the queue without touching any slot. A launching
    /// or running task releases its slot exactly once and its worker is asked
    /// to stop. The task is `cancelled` from this call on, whatever the
    /// worker does afterwards. Cancelling a terminal task is a no-op.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), FleetError> {
        let worker = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let status = state.registry.status(id)?;
            if status.is_terminal() {
                tracing::debug!(task_id = %id, %status, "cancel of terminal task ignored");
                return Ok(());
            }
            let worker = state.registry.mark_cancelled(id)?;
            let (next, dequeued) = state.plan.remove_pending(id);
            let (next, released) = next.release(id);
            state.plan = next;
            if let Some(token) = state.monitors.remove(id) {
                token.cancel();
            }
            if let Ok(record) = state.registry.get(id) {
                if let Err(err) = state.accountant.record(record) {
                    tracing::warn!(task_id = %id, error = %err, "cost not recorded");
                }
            }
            tracing::info!(task_id = %id, dequeued, released, "task cancelled");
            worker
        };

        self.inner.advance();

        if let Some(worker) = worker {
            self.inner.stop_worker(&worker).await;
        }
        Ok(())
    }

    /// Submits `function` once per item and returns the values in item
    /// order. The first failure is returned after every task has finished.
    pub async fn map<T: Serialize>(
        &self,
        function: &str,
        items: impl IntoIterator<Item = T>,
    ) -> Result<Vec<Value>, FleetError> {
        future::map_with_policy(self, function, items, MapPolicy::RunToCompletion).await
    }

    /// Like [`map`](Self::map) with an explicit failure policy.
    pub async fn map_with_policy<T: Serialize>(
        &self,
        function: &str,
        items: impl IntoIterator<Item = T>,
        policy: MapPolicy,
    ) -> Result<Vec<Value>, FleetError> {
        future::map_with_policy(self, function, items, policy).await
    }

    /// Forgets a terminal task and deletes its stored objects.
    pub async fn discard(&self, id: &TaskId) -> Result<(), FleetError> {
        self.inner.state.lock().registry.discard(id)?;
        self.inner.store.discard(id).await?;
        tracing::debug!(task_id = %id, "task discarded");
        Ok(())
    }

    // ---- Introspection ----

    /// Current status of a task.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatus, FleetError> {
        self.inner.state.lock().registry.status(id)
    }

    /// Snapshot of a task's record.
    pub fn task(&self, id: &TaskId) -> Result<TaskRecord, FleetError> {
        self.inner.state.lock().registry.get(id).cloned()
    }

    /// Tasks holding a quota slot, including those whose launch is in
    /// flight. Never exceeds the quota.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().plan.occupied_count()
    }

    /// Tasks waiting for admission.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().plan.pending_count()
    }

    /// Queue contents, head first.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        self.inner.state.lock().plan.pending_ids()
    }

    /// Waves with members still holding slots.
    pub fn active_waves(&self) -> Vec<Wave> {
        self.inner.state.lock().plan.active_waves()
    }

    /// Per-task cost records and totals so far.
    pub fn cost_report(&self) -> CostReport {
        self.inner.state.lock().accountant.report()
    }

    /// The plan this session runs.
    pub fn plan(&self) -> &ClusterPlan {
        &self.inner.plan
    }

    /// The resolved worker image.
    pub fn image(&self) -> &ImageReference {
        &self.inner.image
    }

    // ---- Lifecycle ----

    fn has_unresolved(&self) -> bool {
        !self.inner.state.lock().registry.unresolved().is_empty()
    }

    /// Stops accepting work, settles unresolved tasks per `mode`, and waits
    /// for every spawned launch and monitor to exit.
    ///
    /// Returns the final cost report.
    pub async fn shutdown(&self, mode: ShutdownMode) -> Result<CostReport, FleetError> {
        self.inner.state.lock().closed = true;
        tracing::info!(?mode, "session shutting down");

        match mode {
            ShutdownMode::CancelOutstanding => {
                let (queued, unresolved) = {
                    let state = self.inner.state.lock();
                    (state.plan.pending_ids(), state.registry.unresolved())
                };
                // Queued tasks go first so released slots admit nothing.
                for id in queued.iter().rev().chain(unresolved.iter()) {
                    if let Err(err) = self.cancel(id).await {
                        tracing::warn!(
                            task_id = %id,
                            error = %err,
                            "cancel during shutdown failed"
                        );
                    }
                }
            },
            ShutdownMode::Drain => {
                let resolve = self.inner.plan.resolve();
                let mut backoff = Backoff::new(resolve.initial_backoff, resolve.max_backoff, 2.0);
                while self.has_unresolved() {
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            },
        }

        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let report = self.cost_report();
        tracing::info!(
            billed_tasks = report.records.len(),
            total_cost = report.total_cost,
            "session shut down"
        );
        Ok(report)
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    plan: ClusterPlan,
    executor: Option<Arc<dyn RemoteExecutor>>,
    store: Option<Arc<dyn ResultStore>>,
    images: Arc<dyn ImageProvider>,
    infra: Arc<dyn InfraProvisioner>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("plan", &self.plan)
            .field("executor", &self.executor.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl SessionBuilder {
    fn new(plan: ClusterPlan) -> Self {
        Self {
            plan,
            executor: None,
            store: None,
            images: Arc::new(StaticImage),
            infra: Arc::new(PreprovisionedInfra::default()),
        }
    }

    /// Sets the executor. It is wrapped with the plan's retry policy.
    pub fn executor<E: RemoteExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Sets the result store. Defaults to an [`InMemoryResultStore`].
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the image provider. Defaults to [`StaticImage`].
    pub fn image_provider<P: ImageProvider + 'static>(mut self, provider: P) -> Self {
        self.images = Arc::new(provider);
        self
    }

    /// Sets the infrastructure provisioner. Defaults to empty
    /// [`PreprovisionedInfra`].
    pub fn infra_provisioner<P: InfraProvisioner + 'static>(mut self, provisioner: P) -> Self {
        self.infra = Arc::new(provisioner);
        self
    }

    /// Resolves the image and infrastructure and starts the session.
    ///
    /// Must be called inside a tokio runtime; the session spawns its launch
    /// and monitor tasks onto it.
    pub async fn build(self) -> Result<Session, FleetError> {
        let executor = self
            .executor
            .ok_or_else(|| FleetError::Config("no executor configured".to_string()))?;
        let runtime = Handle::try_current()
            .map_err(|e| FleetError::Config(format!("session requires a tokio runtime: {e}")))?;

        let image = self.images.resolve_image(&self.plan).await?;
        let infra = self.infra.ensure_capacity(&self.plan).await?;
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(RetryingExecutor::new(executor, self.plan.retry().clone()));

        tracing::info!(
            quota = %self.plan.quota(),
            worker = %self.plan.worker_shape(),
            image = %image.uri,
            subnets = infra.subnets.len(),
            "fleet session started"
        );

        let state = SessionState {
            registry: TaskRegistry::new(),
            plan: PlanState::new(),
            accountant: CostAccountant::new(self.plan.pricing().clone()),
            monitors: HashMap::new(),
            closed: false,
        };

        Ok(Session {
            inner: Arc::new(SessionInner {
                plan: self.plan,
                image,
                infra,
                executor,
                store: self.store.unwrap_or_else(|| {
                    Arc::new(InMemoryResultStore::new()) as Arc<dyn ResultStore>
                }),
                state: Mutex::new(state),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                runtime,
            }),
        })
    }
}
