//! In-memory object backend and result store.
//!
//! [`InMemoryBackend`] provides a thread-safe [`ObjectBackend`] using
//! `DashMap<String, Vec<u8>>`. It is a dumb object store with no domain
//! logic.
//!
//! [`InMemoryResultStore`] is a thin wrapper around
//! [`GenericResultStore<InMemoryBackend>`](crate::store::generic::GenericResultStore)
//! with a zero-argument `new()` constructor and `Default` impl.
//!
//! # Examples
//!
//! ```
//! use fleet_futures::store::memory::InMemoryResultStore;
//! use fleet_futures::store::StoreConfig;
//!
//! let store = InMemoryResultStore::new().with_config(StoreConfig::default());
//! assert!(store.backend().is_empty());
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::backend::{ObjectBackend, StorageError};
use crate::store::generic::GenericResultStore;
use crate::types::task::{TaskId, TaskOutcome, WorkDescriptor};

use super::{ResultStore, StoreConfig};

// ---- InMemoryBackend: dumb object store using DashMap ----

/// Thread-safe in-memory object backend using [`DashMap`].
///
/// Write-once semantics come from the shard-locked entry API: two racing
/// [`put_if_absent`](ObjectBackend::put_if_absent) calls for the same key
/// cannot both observe a vacant entry.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: DashMap<String, Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Returns the number of objects stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the backend contains no objects.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if an object exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Overwrites the raw bytes under `key`, bypassing write-once checks.
    ///
    /// Used to simulate torn or tampered objects in tests.
    pub fn replace_raw(&self, key: &str, data: Vec<u8>) {
        self.data.insert(key.to_string(), data);
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.data
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        match self.data.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists {
                key: key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(data.to_vec());
                Ok(())
            },
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.remove(key).is_some())
    }
}

// ---- InMemoryResultStore: wrapper around GenericResultStore ----

/// In-memory result store, suitable for tests and local development.
#[derive(Debug)]
pub struct InMemoryResultStore {
    inner: GenericResultStore<InMemoryBackend>,
}

impl InMemoryResultStore {
    /// Creates an empty store with default configuration.
    pub fn new() -> Self {
        Self {
            inner: GenericResultStore::new(InMemoryBackend::new()),
        }
    }

    /// Sets the store configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &InMemoryBackend {
        self.inner.backend()
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, task_id: &TaskId, outcome: &TaskOutcome) -> Result<String, StorageError> {
        self.inner.put_outcome(task_id, outcome).await
    }

    async fn get(&self, task_id: &TaskId) -> Result<TaskOutcome, StorageError> {
        self.inner.get_outcome(task_id).await
    }

    async fn put_descriptor(
        &self,
        task_id: &TaskId,
        descriptor: &WorkDescriptor,
    ) -> Result<String, StorageError> {
        self.inner.put_descriptor(task_id, descriptor).await
    }

    async fn get_descriptor(&self, task_id: &TaskId) -> Result<WorkDescriptor, StorageError> {
        self.inner.get_descriptor(task_id).await
    }

    async fn discard(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        self.inner.discard(task_id).await
    }
}
