//! Per-task supervision of a running worker.
//!
//! One monitor runs per running task. It polls the executor on the plan's
//! interval and turns what it sees into exactly one terminal report:
//!
//! - `Succeeded` / `Failed` from the worker.
//! - `Vanished` (or a fatal poll error) observed continuously for the
//!   vanish grace period.
//! - The task timeout elapsing first. The in-flight poll is abandoned and
//!   the task fails with a timeout error, releasing its slot. Only then is
//!   the worker asked to stop, bounded by the plan's stop timeout.
//!
//! The monitor exits silently when its token is cancelled, which happens
//! when the caller cancels the task or the session shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::{Finish, SessionInner};
use crate::executor::{PollStatus, WorkerHandle};
use crate::types::task::{FailureKind, TaskFailure};

pub(crate) async fn watch(
    session: Arc<SessionInner>,
    worker: WorkerHandle,
    timeout: Option<Duration>,
    token: CancellationToken,
) {
    let settings = session.plan.executor().clone();
    let task_id = worker.task_id.clone();
    let deadline = timeout.map(|t| Instant::now() + t);
    let expiry = async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);

    let mut vanished_since: Option<Instant> = None;

    loop {
        let step = async {
            sleep(settings.poll_interval).await;
            session.executor.poll(&worker).await
        };

        let polled = tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = &mut expiry => {
                let after = timeout.unwrap_or_default();
                tracing::warn!(
                    task_id = %task_id,
                    worker = %worker.worker_id,
                    timeout_ms = after.as_millis() as u64,
                    "task timed out"
                );
                // The slot is freed before the stop request goes out.
                session.finish(&task_id, Finish::Failed {
                    failure: TaskFailure::timeout(after),
                    runtime: None,
                });
                session.stop_worker(&worker).await;
                return;
            },
            polled = step => polled,
        };

        match polled {
            Ok(PollStatus::Running) => {
                vanished_since = None;
            },
            Ok(PollStatus::Succeeded {
                result_ref,
                runtime,
            }) => {
                tracing::debug!(task_id = %task_id, result_ref = %result_ref, "worker succeeded");
                session.finish(&task_id, Finish::Completed {
                    result_ref,
                    runtime,
                });
                return;
            },
            Ok(PollStatus::Failed { message, runtime }) => {
                tracing::debug!(task_id = %task_id, error = %message, "worker failed");
                session.finish(&task_id, Finish::Failed {
                    failure: TaskFailure::new(FailureKind::Runtime, message),
                    runtime,
                });
                return;
            },
            Ok(PollStatus::Vanished) => {
                if vanish_grace_spent(&mut vanished_since, settings.vanish_grace) {
                    report_vanished(
                        &session,
                        &worker,
                        "worker disappeared without a terminal report",
                    );
                    return;
                }
                tracing::warn!(
                    task_id = %task_id,
                    worker = %worker.worker_id,
                    "worker not found, waiting out grace period"
                );
            },
            Err(err) if err.is_fatal() => {
                if vanish_grace_spent(&mut vanished_since, settings.vanish_grace) {
                    report_vanished(&session, &worker, &err.to_string());
                    return;
                }
                tracing::warn!(task_id = %task_id, error = %err, "worker status unavailable");
            },
            Err(err) => {
                tracing::warn!(
                    task_id = %task_id,
                    error = %err,
                    "poll failed, retrying next interval"
                );
            },
        }
    }
}

/// Starts the grace clock on first sighting and reports whether it ran out.
fn vanish_grace_spent(since: &mut Option<Instant>, grace: Duration) -> bool {
    let first_seen = *since.get_or_insert_with(Instant::now);
    first_seen.elapsed() >= grace
}

fn report_vanished(session: &Arc<SessionInner>, worker: &WorkerHandle, detail: &str) {
    tracing::warn!(
        task_id = %worker.task_id,
        worker = %worker.worker_id,
        detail,
        "worker vanished"
    );
    session.finish(
        &worker.task_id,
        Finish::Failed {
            failure: TaskFailure::new(
                FailureKind::Vanished,
                format!("worker {}: {detail}", worker.worker_id),
            ),
            runtime: None,
        },
    );
}
