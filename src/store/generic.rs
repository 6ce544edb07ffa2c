//! Generic result store with all domain logic delegating to an [`ObjectBackend`].
//!
//! [`GenericResultStore`] implements write-once persistence of task outcomes
//! and descriptors, payload size limits, and the digest envelope on top of
//! any [`ObjectBackend`] implementation.
//!
//! # Object Format
//!
//! Every object is stored as the lowercase hex SHA-256 digest of the JSON
//! payload, a single `\n`, then the payload bytes:
//!
//! ```text
//! 9f86d081884c7d65...\n{"outcome":"success","value":16}
//! ```
//!
//! Reads split at the first newline and recompute the digest over the exact
//! payload bytes, so a truncated or overwritten object surfaces as
//! [`StorageError::Corrupted`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::backend::{descriptor_key, result_key, ObjectBackend, StorageError};
use crate::store::StoreConfig;
use crate::types::task::{TaskId, TaskOutcome, WorkDescriptor};

/// Generic result store that delegates all storage to an [`ObjectBackend`].
///
/// # Type Parameters
///
/// * `B` - An [`ObjectBackend`] implementation (in-memory, S3)
#[derive(Debug)]
pub struct GenericResultStore<B: ObjectBackend> {
    backend: B,
    config: StoreConfig,
}

impl<B: ObjectBackend> GenericResultStore<B> {
    /// Creates a new result store backed by the given backend with
    /// [`StoreConfig::default()`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: StoreConfig::default(),
        }
    }

    /// Sets the store configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ---- Envelope helpers (private) ----

    fn seal<T: Serialize>(&self, key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
        let payload = serde_json::to_vec(value).map_err(|e| StorageError::Backend {
            message: format!("failed to serialize object for {key}"),
            source: Some(Box::new(e)),
        })?;
        if payload.len() > self.config.max_payload_bytes {
            return Err(StorageError::backend(format!(
                "object for {key} is {} bytes, limit is {}",
                payload.len(),
                self.config.max_payload_bytes
            )));
        }
        let digest = hex_digest(&payload);
        let mut sealed = Vec::with_capacity(digest.len() + 1 + payload.len());
        sealed.extend_from_slice(digest.as_bytes());
        sealed.push(b'\n');
        sealed.extend_from_slice(&payload);
        Ok(sealed)
    }

    fn open<T: DeserializeOwned>(&self, key: &str, sealed: &[u8]) -> Result<T, StorageError> {
        let corrupted = |message: String| StorageError::Corrupted {
            key: key.to_string(),
            message,
        };

        let split = sealed
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| corrupted("missing digest header".to_string()))?;
        let (header, rest) = sealed.split_at(split);
        let payload = &rest[1..];

        if self.config.verify_digest {
            let expected = std::str::from_utf8(header)
                .map_err(|_| corrupted("digest header is not UTF-8".to_string()))?;
            let actual = hex_digest(payload);
            if expected != actual {
                return Err(corrupted(format!(
                    "digest mismatch: stored {expected}, computed {actual}"
                )));
            }
        }

        serde_json::from_slice(payload).map_err(|e| corrupted(format!("invalid payload: {e}")))
    }

    // ---- Domain operations (public) ----

    /// Writes a task outcome once. See [`ResultStore::put`](super::ResultStore::put).
    pub async fn put_outcome(
        &self,
        task_id: &TaskId,
        outcome: &TaskOutcome,
    ) -> Result<String, StorageError> {
        let key = result_key(task_id.as_str());
        let sealed = self.seal(&key, outcome)?;
        self.backend.put_if_absent(&key, &sealed).await?;
        tracing::debug!(task_id = %task_id, key = %key, "stored task outcome");
        Ok(key)
    }

    /// Reads a task outcome. See [`ResultStore::get`](super::ResultStore::get).
    pub async fn get_outcome(&self, task_id: &TaskId) -> Result<TaskOutcome, StorageError> {
        let key = result_key(task_id.as_str());
        let sealed = self.backend.get(&key).await?;
        self.open(&key, &sealed)
    }

    /// Writes a work descriptor once.
    pub async fn put_descriptor(
        &self,
        task_id: &TaskId,
        descriptor: &WorkDescriptor,
    ) -> Result<String, StorageError> {
        let key = descriptor_key(task_id.as_str());
        let sealed = self.seal(&key, descriptor)?;
        self.backend.put_if_absent(&key, &sealed).await?;
        Ok(key)
    }

    /// Reads a work descriptor.
    pub async fn get_descriptor(&self, task_id: &TaskId) -> Result<WorkDescriptor, StorageError> {
        let key = descriptor_key(task_id.as_str());
        let sealed = self.backend.get(&key).await?;
        self.open(&key, &sealed)
    }

    /// Deletes both objects of a task. Missing objects are ignored.
    pub async fn discard(&self, task_id: &TaskId) -> Result<bool, StorageError> {
        let result = self.backend.delete(&result_key(task_id.as_str())).await?;
        let descriptor = self
            .backend
            .delete(&descriptor_key(task_id.as_str()))
            .await?;
        Ok(result || descriptor)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
