//! Bounded exponential backoff for transient executor errors.
//!
//! [`RetryingExecutor`] wraps any [`RemoteExecutor`] and retries
//! [`launch`](RemoteExecutor::launch) and [`cancel`](RemoteExecutor::cancel)
//! while the inner executor reports [`ExecutorError::Transient`]. Once
//! [`RetryPolicy::max_attempts`] is reached the last error is escalated to
//! [`ExecutorError::RetriesExhausted`]. Fatal errors pass through on the first
//! attempt.
//!
//! [`poll`](RemoteExecutor::poll) is not retried here: the task monitor polls
//! on an interval anyway and simply tries again on its next tick.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExecutorError, LaunchRequest, PollStatus, RemoteExecutor, WorkerHandle};

/// Retry configuration for transient executor errors.
///
/// | Field             | Default |
/// |-------------------|---------|
/// | `max_attempts`    | 5       |
/// | `initial_backoff` | 100 ms  |
/// | `max_backoff`     | 5 s     |
/// | `multiplier`      | 2.0     |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_futures::executor::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default().with_max_attempts(3);
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.initial_backoff, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied after each delay.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total attempt count.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the first delay.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Returns a fresh [`Backoff`] sequence for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_backoff, self.max_backoff, self.multiplier)
    }
}

/// Capped exponential delay sequence.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_futures::executor::retry::Backoff;
///
/// let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(25), 2.0);
/// assert_eq!(backoff.next_delay(), Duration::from_millis(10));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(20));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(25));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(25));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Creates a sequence starting at `initial`, growing by `multiplier`,
    /// never exceeding `max`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            current: initial.min(max),
            max,
            multiplier: multiplier.max(1.0),
        }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        delay
    }

    /// Restarts the sequence at `initial`.
    pub fn reset(&mut self, initial: Duration) {
        self.current = initial.min(self.max);
    }
}

/// Executor decorator that retries transient errors with backoff.
#[derive(Debug, Clone)]
pub struct RetryingExecutor<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: RemoteExecutor> RetryingExecutor<E> {
    /// Wraps `inner` with the given policy.
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Returns the wrapped executor.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Returns the active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retries<T, F, Fut>(
        &self,
        operation: &str,
        subject: &str,
        mut call: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, ExecutorError>> + Send,
        T: Send,
    {
        let mut backoff = self.policy.backoff();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        subject,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient executor error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) if err.is_transient() => {
                    return Err(ExecutorError::RetriesExhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<E: RemoteExecutor> RemoteExecutor for RetryingExecutor<E> {
    async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError> {
        self.with_retries("launch", request.task_id.as_str(), || self.inner.launch(request))
            .await
    }

    async fn poll(&self, worker: &WorkerHandle) -> Result<PollStatus, ExecutorError> {
        self.inner.poll(worker).await
    }

    async fn cancel(&self, worker: &WorkerHandle) -> Result<(), ExecutorError> {
        self.with_retries("cancel", worker.task_id.as_str(), || self.inner.cancel(worker))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::{ResourceShape, TaskId, WorkDescriptor};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` launches with the given error.
    struct Flaky {
        failures: u32,
        fatal: bool,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl RemoteExecutor for Flaky {
        async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.fatal {
                    return Err(ExecutorError::Fatal {
                        message: "denied".to_string(),
                    });
                }
                return Err(ExecutorError::Transient {
                    message: "throttled".to_string(),
                });
            }
            Ok(WorkerHandle::new("w-1", request.task_id.clone()))
        }

        async fn poll(&self, _worker: &WorkerHandle) -> Result<PollStatus, ExecutorError> {
            Ok(PollStatus::Running)
        }

        async fn cancel(&self, _worker: &WorkerHandle) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn request() -> LaunchRequest {
        LaunchRequest::new(
            TaskId::from("t-1"),
            WorkDescriptor::new("noop", serde_json::Value::Null),
            ResourceShape::new(256, 512),
            "img",
        )
    }

    fn flaky(failures: u32, fatal: bool) -> (Flaky, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Flaky {
                failures,
                fatal,
                calls: calls.clone(),
            },
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let (inner, calls) = flaky(2, false);
        let executor = RetryingExecutor::new(inner, RetryPolicy::default());
        let handle = executor.launch(&request()).await.unwrap();
        assert_eq!(handle.worker_id, "w-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_escalate() {
        let (inner, calls) = flaky(10, false);
        let executor = RetryingExecutor::new(inner, RetryPolicy::default().with_max_attempts(3));
        let err = executor.launch(&request()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let (inner, calls) = flaky(10, true);
        let executor = RetryingExecutor::new(inner, RetryPolicy::default());
        let err = executor.launch(&request()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Fatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_between_attempts() {
        let (inner, _calls) = flaky(2, false);
        let executor = RetryingExecutor::new(inner, RetryPolicy::default());
        let started = tokio::time::Instant::now();
        executor.launch(&request()).await.unwrap();
        // 100ms + 200ms
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn backoff_multiplier_below_one_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1), 0.5);
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
