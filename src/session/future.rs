//! Caller-facing future capability and handle.
//!
//! [`FutureBackend`] is the small capability set a future needs: submit,
//! check resolution, wait for the value, cancel. [`Session`] implements it;
//! [`map_with_policy`] is written purely against it.
//!
//! [`FleetFuture`] is the handle returned by
//! [`Session::submit`](Session::submit). It holds only the task identifier
//! and a session handle; the task itself stays owned by the registry.

use std::fmt;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Session, SubmitOptions};
use crate::domain::TaskRecord;
use crate::error::FleetError;
use crate::types::task::{TaskId, TaskStatus, WorkDescriptor};

/// What happens to the other tasks of a batch once one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MapPolicy {
    /// Every task still runs to completion; the first failure is returned
    /// afterwards.
    #[default]
    RunToCompletion,
    /// Unresolved tasks are cancelled as soon as a failure is seen.
    CancelRemaining,
}

/// The operations a future-style handle needs from its backend.
#[async_trait]
pub trait FutureBackend: Send + Sync {
    /// Registers and enqueues a work unit, returning its identifier.
    fn submit(&self, work: WorkDescriptor) -> Result<TaskId, FleetError>;

    /// Returns `true` if the task is terminal.
    fn is_resolved(&self, id: &TaskId) -> Result<bool, FleetError>;

    /// Waits for the task and returns its value or recorded failure.
    async fn value(&self, id: &TaskId) -> Result<Value, FleetError>;

    /// Cancels the task.
    async fn cancel(&self, id: &TaskId) -> Result<(), FleetError>;
}

#[async_trait]
impl FutureBackend for Session {
    fn submit(&self, work: WorkDescriptor) -> Result<TaskId, FleetError> {
        self.submit_with(work, SubmitOptions::default())
            .map(|future| future.id().clone())
    }

    fn is_resolved(&self, id: &TaskId) -> Result<bool, FleetError> {
        Session::is_resolved(self, id)
    }

    async fn value(&self, id: &TaskId) -> Result<Value, FleetError> {
        Session::value(self, id).await
    }

    async fn cancel(&self, id: &TaskId) -> Result<(), FleetError> {
        Session::cancel(self, id).await
    }
}

/// Submits `function` once per item and collects the values in item order.
///
/// Values are awaited concurrently. Under [`MapPolicy::RunToCompletion`]
/// every task is awaited and the first failure in item order is returned;
/// under [`MapPolicy::CancelRemaining`] the first failure observed cancels
/// the tasks not yet resolved and is returned at once. If a submission
/// fails part-way, already submitted tasks are handled by the same policy.
pub async fn map_with_policy<B, T>(
    backend: &B,
    function: &str,
    items: impl IntoIterator<Item = T>,
    policy: MapPolicy,
) -> Result<Vec<Value>, FleetError>
where
    B: FutureBackend + ?Sized,
    T: Serialize,
{
    let works = items
        .into_iter()
        .map(|item| WorkDescriptor::with_args(function, &item))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ids = Vec::with_capacity(works.len());
    for work in works {
        match backend.submit(work) {
            Ok(id) => ids.push(id),
            Err(err) => {
                if policy == MapPolicy::CancelRemaining {
                    cancel_all(backend, &ids).await;
                }
                return Err(err);
            },
        }
    }

    let mut pending = ids
        .iter()
        .enumerate()
        .map(|(position, id)| async move { (position, backend.value(id).await) })
        .collect::<FuturesUnordered<_>>();

    let mut values: Vec<Option<Value>> = vec![None; ids.len()];
    let mut first_error: Option<(usize, FleetError)> = None;
    while let Some((position, result)) = pending.next().await {
        match result {
            Ok(value) => values[position] = Some(value),
            Err(err) => {
                tracing::debug!(
                    task_id = %ids[position],
                    position,
                    error = %err,
                    ?policy,
                    "batch item failed"
                );
                if policy == MapPolicy::CancelRemaining {
                    drop(pending);
                    let unresolved: Vec<TaskId> = ids
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i != position && values[*i].is_none())
                        .map(|(_, id)| id.clone())
                        .collect();
                    cancel_all(backend, &unresolved).await;
                    return Err(err);
                }
                if first_error.as_ref().is_none_or(|(first, _)| position < *first) {
                    first_error = Some((position, err));
                }
            },
        }
    }

    if let Some((_, err)) = first_error {
        return Err(err);
    }
    Ok(values.into_iter().flatten().collect())
}

/// Cancels tail first, so slots released by running tasks find the queue
/// already empty.
async fn cancel_all<B: FutureBackend + ?Sized>(backend: &B, ids: &[TaskId]) {
    for id in ids.iter().rev() {
        if let Err(err) = backend.cancel(id).await {
            tracing::warn!(task_id = %id, error = %err, "batch cancellation failed");
        }
    }
}

/// Handle to one submitted task.
#[derive(Clone)]
pub struct FleetFuture {
    id: TaskId,
    session: Session,
}

impl fmt::Debug for FleetFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetFuture").field("id", &self.id).finish()
    }
}

impl FleetFuture {
    pub(crate) fn new(id: TaskId, session: Session) -> Self {
        Self { id, session }
    }

    /// The task identifier.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Returns `true` once the task is terminal.
    pub fn is_resolved(&self) -> Result<bool, FleetError> {
        self.session.is_resolved(&self.id)
    }

    /// Current status.
    pub fn status(&self) -> Result<TaskStatus, FleetError> {
        self.session.status(&self.id)
    }

    /// Snapshot of the task record.
    pub fn task(&self) -> Result<TaskRecord, FleetError> {
        self.session.task(&self.id)
    }

    /// Waits for the value. See [`Session::value`].
    pub async fn value(&self) -> Result<Value, FleetError> {
        self.session.value(&self.id).await
    }

    /// Waits for the value and deserializes it.
    pub async fn value_as<T: DeserializeOwned>(&self) -> Result<T, FleetError> {
        self.session.value_as(&self.id).await
    }

    /// Cancels the task. See [`Session::cancel`].
    pub async fn cancel(&self) -> Result<(), FleetError> {
        self.session.cancel(&self.id).await
    }

    /// Forgets the resolved task and deletes its stored objects.
    pub async fn discard(self) -> Result<(), FleetError> {
        self.session.discard(&self.id).await
    }
}
