//! In-process simulated fleet.
//!
//! [`LocalExecutor`] runs registered functions on tokio tasks as if each one
//! were a remote worker: it sleeps for the function's simulated duration,
//! runs the body, writes the outcome to the shared [`ResultStore`] under
//! `results/{task_id}`, and reports it through [`poll`](RemoteExecutor::poll).
//!
//! Faults can be scripted per executor or per function: transient launch
//! failures, fatal launch rejections, workers that stall forever, and
//! workers that vanish without reporting. The executor also tracks how many
//! workers were alive at once, so tests can check the quota from the fleet's
//! side.
//!
//! Durations use `tokio::time`, so tests running with a paused clock advance
//! through simulated work instantly.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fleet_futures::executor::local::LocalExecutor;
//! use fleet_futures::store::InMemoryResultStore;
//! use serde_json::json;
//!
//! let store = Arc::new(InMemoryResultStore::new());
//! let fleet = LocalExecutor::new(store).with_function("square", Duration::from_secs(2), |args| {
//!     let n = args.as_i64().ok_or("expected an integer")?;
//!     Ok(json!(n * n))
//! });
//! assert_eq!(fleet.high_water(), 0);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{ExecutorError, LaunchRequest, PollStatus, RemoteExecutor, WorkerHandle};
use crate::store::{ResultStore, StorageError};
use crate::types::task::{FailureKind, TaskFailure, TaskId, TaskOutcome};

type WorkFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

fn no_output(_: &Value) -> Result<Value, String> {
    Ok(Value::Null)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    Complete,
    Stall,
    Vanish,
}

#[derive(Clone)]
struct LocalFunction {
    body: WorkFn,
    duration: Duration,
    behavior: Behavior,
}

#[derive(Debug, Default)]
struct Faults {
    transient_launches: u32,
    transient_by_function: HashMap<String, u32>,
    rejected_functions: HashSet<String>,
}

#[derive(Debug, Clone)]
enum WorkerState {
    Running,
    Succeeded { result_ref: String, runtime: Duration },
    Failed { message: String, runtime: Duration },
    Cancelled,
}

#[derive(Debug)]
struct Worker {
    state: WorkerState,
    alive: bool,
    token: CancellationToken,
}

struct LocalFleet {
    store: Arc<dyn ResultStore>,
    functions: RwLock<HashMap<String, LocalFunction>>,
    workers: DashMap<String, Worker>,
    faults: Mutex<Faults>,
    next_worker: AtomicU64,
    launches: AtomicUsize,
    alive: AtomicUsize,
    high_water: AtomicUsize,
}

impl LocalFleet {
    /// Marks a worker as no longer alive, exactly once, and records its
    /// final state.
    fn retire(&self, worker_id: &str, state: WorkerState) {
        if let Some(mut worker) = self.workers.get_mut(worker_id) {
            if worker.alive {
                worker.alive = false;
                worker.state = state;
                self.alive.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    fn take_fault(&self, function: &str) -> Option<ExecutorError> {
        let mut faults = self.faults.lock();
        if faults.rejected_functions.contains(function) {
            return Some(ExecutorError::fatal(format!(
                "launch of {function} permanently denied"
            )));
        }
        if let Some(remaining) = faults.transient_by_function.get_mut(function) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(ExecutorError::transient(format!(
                    "capacity unavailable for {function}"
                )));
            }
        }
        if faults.transient_launches > 0 {
            faults.transient_launches -= 1;
            return Some(ExecutorError::transient("request throttled"));
        }
        None
    }

    async fn run_worker(
        self: Arc<Self>,
        worker_id: String,
        task_id: TaskId,
        args: Value,
        function: LocalFunction,
        token: CancellationToken,
    ) {
        let started = Instant::now();
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(function.duration) => {},
        }

        match function.behavior {
            Behavior::Stall => {
                token.cancelled().await;
                return;
            },
            Behavior::Vanish => {
                self.retire(&worker_id, WorkerState::Cancelled);
                self.workers.remove(&worker_id);
                return;
            },
            Behavior::Complete => {},
        }

        let result = (function.body)(&args);
        let runtime = started.elapsed();
        let state = match result {
            Ok(value) => match self.store.put(&task_id, &TaskOutcome::success(value)).await {
                Ok(result_ref) => WorkerState::Succeeded {
                    result_ref,
                    runtime,
                },
                Err(StorageError::AlreadyExists { key }) => WorkerState::Succeeded {
                    result_ref: key,
                    runtime,
                },
                Err(err) => WorkerState::Failed {
                    message: format!("failed to store result: {err}"),
                    runtime,
                },
            },
            Err(message) => {
                let failure = TaskFailure::new(FailureKind::Runtime, message.clone());
                if let Err(err) = self.store.put(&task_id, &TaskOutcome::failure(failure)).await {
                    tracing::debug!(task_id = %task_id, error = %err, "failure outcome not stored");
                }
                WorkerState::Failed { message, runtime }
            },
        };
        if !token.is_cancelled() {
            self.retire(&worker_id, state);
        }
    }
}

/// Simulated fleet of workers running in-process.
#[derive(Clone)]
pub struct LocalExecutor {
    fleet: Arc<LocalFleet>,
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("functions", &self.fleet.functions.read().len())
            .field("workers", &self.fleet.workers.len())
            .field("alive", &self.alive_workers())
            .field("high_water", &self.high_water())
            .finish()
    }
}

impl LocalExecutor {
    /// Creates a fleet that writes outcomes to `store`.
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            fleet: Arc::new(LocalFleet {
                store,
                functions: RwLock::new(HashMap::new()),
                workers: DashMap::new(),
                faults: Mutex::new(Faults::default()),
                next_worker: AtomicU64::new(1),
                launches: AtomicUsize::new(0),
                alive: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }),
        }
    }

    fn insert(&self, name: impl Into<String>, function: LocalFunction) {
        self.fleet.functions.write().insert(name.into(), function);
    }

    /// Registers a function that completes after `duration`.
    pub fn with_function<F>(self, name: impl Into<String>, duration: Duration, body: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert(
            name,
            LocalFunction {
                body: Arc::new(body),
                duration,
                behavior: Behavior::Complete,
            },
        );
        self
    }

    /// Registers a function whose worker never reports.
    pub fn with_stalling_function(self, name: impl Into<String>) -> Self {
        self.insert(
            name,
            LocalFunction {
                body: Arc::new(no_output),
                duration: Duration::ZERO,
                behavior: Behavior::Stall,
            },
        );
        self
    }

    /// Registers a function whose worker disappears after `after`.
    pub fn with_vanishing_function(self, name: impl Into<String>, after: Duration) -> Self {
        self.insert(
            name,
            LocalFunction {
                body: Arc::new(no_output),
                duration: after,
                behavior: Behavior::Vanish,
            },
        );
        self
    }

    /// Fails the next `count` launches, of any function, transiently.
    pub fn fail_next_launches(&self, count: u32) {
        self.fleet.faults.lock().transient_launches += count;
    }

    /// Fails the next `count` launches of `function` transiently.
    pub fn fail_launches_of(&self, function: impl Into<String>, count: u32) {
        *self
            .fleet
            .faults
            .lock()
            .transient_by_function
            .entry(function.into())
            .or_default() += count;
    }

    /// Rejects every launch of `function` fatally.
    pub fn reject_function(&self, function: impl Into<String>) {
        self.fleet
            .faults
            .lock()
            .rejected_functions
            .insert(function.into());
    }

    /// Launch calls received, including failed ones.
    pub fn launches(&self) -> usize {
        self.fleet.launches.load(Ordering::SeqCst)
    }

    /// Workers currently alive.
    pub fn alive_workers(&self) -> usize {
        self.fleet.alive.load(Ordering::SeqCst)
    }

    /// Most workers ever alive at once.
    pub fn high_water(&self) -> usize {
        self.fleet.high_water.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn launch(&self, request: &LaunchRequest) -> Result<WorkerHandle, ExecutorError> {
        self.fleet.launches.fetch_add(1, Ordering::SeqCst);
        let name = request.descriptor.function.as_str();

        if let Some(fault) = self.fleet.take_fault(name) {
            return Err(fault);
        }
        let function = self
            .fleet
            .functions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutorError::fatal(format!("unknown function: {name}")))?;

        let worker_id = format!(
            "local-{}",
            self.fleet.next_worker.fetch_add(1, Ordering::SeqCst)
        );
        let token = CancellationToken::new();
        self.fleet.workers.insert(
            worker_id.clone(),
            Worker {
                state: WorkerState::Running,
                alive: true,
                token: token.clone(),
            },
        );
        let alive = self.fleet.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.fleet.high_water.fetch_max(alive, Ordering::SeqCst);

        tokio::spawn(self.fleet.clone().run_worker(
            worker_id.clone(),
            request.task_id.clone(),
            request.descriptor.args.clone(),
            function,
            token,
        ));

        tracing::debug!(
            task_id = %request.task_id,
            worker = %worker_id,
            alive,
            "local worker started"
        );
        Ok(WorkerHandle::new(worker_id, request.task_id.clone()))
    }

    async fn poll(&self, worker: &WorkerHandle) -> Result<PollStatus, ExecutorError> {
        let Some(entry) = self.fleet.workers.get(&worker.worker_id) else {
            return Ok(PollStatus::Vanished);
        };
        Ok(match &entry.state {
            WorkerState::Running => PollStatus::Running,
            WorkerState::Succeeded {
                result_ref,
                runtime,
            } => PollStatus::Succeeded {
                result_ref: result_ref.clone(),
                runtime: Some(*runtime),
            },
            WorkerState::Failed { message, runtime } => PollStatus::Failed {
                message: message.clone(),
                runtime: Some(*runtime),
            },
            WorkerState::Cancelled => PollStatus::Failed {
                message: "worker stopped by request".to_string(),
                runtime: None,
            },
        })
    }

    async fn cancel(&self, worker: &WorkerHandle) -> Result<(), ExecutorError> {
        let token = self
            .fleet
            .workers
            .get(&worker.worker_id)
            .map(|entry| entry.token.clone());
        if let Some(token) = token {
            token.cancel();
            self.fleet.retire(&worker.worker_id, WorkerState::Cancelled);
        }
        Ok(())
    }
}
