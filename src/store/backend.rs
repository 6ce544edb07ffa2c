//! Low-level object storage backend trait and supporting types.
//!
//! The [`ObjectBackend`] trait defines the contract that all object stores
//! implement. It exposes 3 operations: [`get`](ObjectBackend::get),
//! [`put_if_absent`](ObjectBackend::put_if_absent), and
//! [`delete`](ObjectBackend::delete).
//!
//! Domain logic (write-once enforcement on results, digest verification,
//! serialization) does **not** belong here. Backends are dumb object stores;
//! domain logic lives in [`GenericResultStore`](super::generic::GenericResultStore).
//!
//! # Key Structure
//!
//! Keys follow the worker convention: `results/{task_id}` for outcomes and
//! `tasks/{task_id}` for work descriptors. See [`result_key`] and
//! [`descriptor_key`].

use std::fmt;

use async_trait::async_trait;

/// Errors that can occur during raw storage operations.
///
/// These are low-level errors from the object backend.
/// [`FleetError::Store`](crate::error::FleetError::Store) wraps them before
/// they reach callers.
///
/// # Examples
///
/// ```
/// use fleet_futures::store::backend::StorageError;
///
/// let err = StorageError::NotFound { key: "results/task-123".to_string() };
/// assert!(err.to_string().contains("results/task-123"));
///
/// let err = StorageError::AlreadyExists { key: "results/task-123".to_string() };
/// assert!(err.to_string().contains("already exists"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The requested key was not found in storage.
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A write-once [`put_if_absent`](ObjectBackend::put_if_absent) found an
    /// existing object under the key.
    AlreadyExists {
        /// The key that was already written.
        key: String,
    },

    /// The stored object could not be decoded or failed digest verification.
    Corrupted {
        /// The affected key.
        key: String,
        /// What was wrong with the object.
        message: String,
    },

    /// An I/O or backend-specific error occurred (network failure, service
    /// throttling, permission denial).
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available. Accessible via
        /// [`std::error::Error::source()`].
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Convenience constructor for a backend error without a source.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "key not found: {key}"),
            Self::AlreadyExists { key } => write!(f, "key already exists: {key}"),
            Self::Corrupted { key, message } => {
                write!(f, "corrupted object at {key}: {message}")
            },
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Object storage backend for task descriptors and results.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the session's monitors and the
/// resolution path read and write concurrently.
///
/// # Atomicity
///
/// [`put_if_absent`](ObjectBackend::put_if_absent) must be atomic: either the
/// full object becomes visible to subsequent [`get`](ObjectBackend::get)
/// calls, or nothing does. Two racing writers must never both succeed.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Retrieves the object bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no object exists for the key.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Stores an object only if no object exists under `key`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AlreadyExists`] if the key is already written.
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Deletes an object by key.
    ///
    /// Returns `true` if the key existed and was deleted, `false` if it did
    /// not exist (idempotent delete).
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] on I/O or backend-specific failures.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Key under which a task's outcome is stored.
///
/// # Examples
///
/// ```
/// use fleet_futures::store::backend::result_key;
///
/// assert_eq!(result_key("task-123"), "results/task-123");
/// ```
pub fn result_key(task_id: &str) -> String {
    format!("results/{task_id}")
}

/// Key under which a task's work descriptor is stored.
///
/// # Examples
///
/// ```
/// use fleet_futures::store::backend::descriptor_key;
///
/// assert_eq!(descriptor_key("task-123"), "tasks/task-123");
/// ```
pub fn descriptor_key(task_id: &str) -> String {
    format!("tasks/{task_id}")
}

/// Extracts the task identifier from a `results/` or `tasks/` key.
///
/// # Examples
///
/// ```
/// use fleet_futures::store::backend::task_id_from_key;
///
/// assert_eq!(task_id_from_key("results/abc"), Some("abc"));
/// assert_eq!(task_id_from_key("tasks/abc"), Some("abc"));
/// assert_eq!(task_id_from_key("other/abc"), None);
/// ```
pub fn task_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("results/")
        .or_else(|| key.strip_prefix("tasks/"))
}
