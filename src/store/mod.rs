//! Result store trait and configuration.
//!
//! The [`ResultStore`] trait is the write-once persistence seam for task
//! outcomes and work descriptors. Objects are addressed by task identifier
//! under the `results/{task_id}` and `tasks/{task_id}` keys, whatever durable
//! object store the implementation wraps.
//!
//! # Layering
//!
//! - [`backend::ObjectBackend`]: dumb object store (in-memory, S3).
//! - [`generic::GenericResultStore`]: write-once enforcement, digest
//!   envelope, size limits, serialization. Implements [`ResultStore`] for
//!   every backend.
//! - [`memory::InMemoryResultStore`]: zero-argument convenience wrapper.
//!
//! # Guarantees
//!
//! - `put` succeeds at most once per task identifier. A second `put` for the
//!   same identifier fails with [`StorageError::AlreadyExists`], which guards
//!   against duplicate completion reports.
//! - Once `put` has returned `Ok`, every subsequent `get` returns the same
//!   outcome. A partially written object is reported as
//!   [`StorageError::Corrupted`], never returned as a value.

pub mod backend;
pub mod generic;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;

use crate::types::task::{TaskId, TaskOutcome, WorkDescriptor};

pub use backend::{ObjectBackend, StorageError};
pub use generic::GenericResultStore;
pub use memory::{InMemoryBackend, InMemoryResultStore};

/// Configuration for result store behavior.
///
/// | Field               | Default |
/// |---------------------|---------|
/// | `max_payload_bytes` | 5 MiB   |
/// | `verify_digest`     | `true`  |
///
/// # Examples
///
/// ```
/// use fleet_futures::store::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.max_payload_bytes, 5 * 1024 * 1024);
/// assert!(config.verify_digest);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum serialized size of one outcome or descriptor.
    pub max_payload_bytes: usize,

    /// Whether `get` recomputes and checks the stored SHA-256 digest.
    pub verify_digest: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 5 * 1024 * 1024,
            verify_digest: true,
        }
    }
}

/// Write-once store for task outcomes and descriptors.
///
/// Implementations must be `Send + Sync`. Workers (or executor doubles)
/// write outcomes; the session reads them when a caller resolves a future.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persists the outcome of a task under `results/{task_id}`.
    ///
    /// Returns the key the outcome was written to.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if an outcome was already stored.
    /// - [`StorageError::Backend`] on I/O failure or if the payload exceeds
    ///   the configured size limit.
    async fn put(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<String, StorageError>;

    /// Reads the outcome of a task.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no outcome has been stored.
    /// - [`StorageError::Corrupted`] if the object fails verification.
    async fn get(&self, task_id: &TaskId) -> Result<TaskOutcome, StorageError>;

    /// Persists a work descriptor under `tasks/{task_id}`.
    ///
    /// Returns the key the descriptor was written to.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if a descriptor was already stored.
    /// - [`StorageError::Backend`] on I/O failure.
    async fn put_descriptor(
        &self,
        task_id: &TaskId,
        descriptor: &WorkDescriptor,
    ) -> Result<String, StorageError>;

    /// Reads a work descriptor.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no descriptor has been stored.
    /// - [`StorageError::Corrupted`] if the object fails verification.
    async fn get_descriptor(&self, task_id: &TaskId) -> Result<WorkDescriptor, StorageError>;

    /// Deletes the outcome and descriptor of a task.
    ///
    /// Missing objects are not an error. Returns `true` if anything was
    /// deleted.
    async fn discard(&self, task_id: &TaskId) -> Result<bool, StorageError>;
}

#[async_trait]
impl<B: ObjectBackend + 'static> ResultStore for GenericResultStore<B> {
    async fn put(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<String, StorageError> {
        GenericResultStore::put_outcome(self, task_id, outcome).await
    }

    async fn get(&self, task_id: &TaskId) -> Result<TaskOutcome, StorageError> {
        GenericResultStore::get_outcome(self, task_id).await
    }

    async fn put_descriptor(
        &self,
        task_id: &TaskId,
        descriptor: &WorkDescriptor,
    ) -> Result<String, StorageError> {
        GenericResultStore::put_descriptor(self, task_id, descriptor).await
    }

    async fn get_descriptor(&self, task_id: &TaskId) -> Result<WorkDescriptor, StorageError> {
        GenericResultStore::get_descriptor(self, task_id).await
    }

    async fn discard(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        GenericResultStore::discard(self, task_id).await
    }
}
