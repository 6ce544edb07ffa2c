//! Amazon S3 object backend.
//!
//! [`S3Backend`] implements [`ObjectBackend`] over one bucket:
//!
//! | Operation       | S3 API                                   |
//! |-----------------|------------------------------------------|
//! | `get`           | `GetObject`                              |
//! | `put_if_absent` | `PutObject` with `If-None-Match: *`      |
//! | `delete`        | `HeadObject` then `DeleteObject`         |
//!
//! Write-once semantics rely on S3 conditional writes: a second `PutObject`
//! on the same key fails with `412 PreconditionFailed` (or `409
//! ConditionalRequestConflict` while a concurrent write is in flight), both
//! reported as [`StorageError::AlreadyExists`].
//!
//! Like every backend, this one is a dumb adapter. Digest sealing and size
//! limits live in [`GenericResultStore`](crate::store::generic::GenericResultStore).
//!
//! # Usage
//!
//! ```rust,no_run
//! use fleet_futures::store::generic::GenericResultStore;
//! use fleet_futures::store::s3::S3Backend;
//!
//! # async fn example() {
//! let backend = S3Backend::from_env("fleet-results").await.with_prefix("run-42/");
//! let store = GenericResultStore::new(backend);
//! # }
//! ```

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use super::backend::{ObjectBackend, StorageError};

/// S3 object backend.
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Backend {
    /// Creates a backend with a pre-built S3 client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Creates a backend using the standard AWS SDK config chain.
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }

    /// Prepends `prefix` to every object key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The bucket objects are stored in.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

/// Maps an AWS SDK error to a [`StorageError::Backend`].
fn map_sdk_error(err: impl std::error::Error + Send + Sync + 'static, key: &str) -> StorageError {
    StorageError::Backend {
        message: format!("S3 error for key {key}: {err}"),
        source: Some(Box::new(err)),
    }
}

/// Conditional-write rejections.
fn is_write_conflict(code: Option<&str>) -> bool {
    matches!(code, Some("PreconditionFailed" | "ConditionalRequestConflict"))
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Err(StorageError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(map_sdk_error(err, key));
            },
        };

        let body = output.body.collect().await.map_err(|e| map_sdk_error(e, key))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .if_none_match("*")
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                if is_write_conflict(err.as_service_error().and_then(|e| e.code())) {
                    return Err(StorageError::AlreadyExists {
                        key: key.to_string(),
                    });
                }
                Err(map_sdk_error(err, key))
            },
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let object_key = self.object_key(key);
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;
        match head {
            Ok(_) => {},
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Ok(false);
            },
            Err(err) => return Err(map_sdk_error(err, key)),
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_codes_map_to_already_exists() {
        assert!(is_write_conflict(Some("PreconditionFailed")));
        assert!(is_write_conflict(Some("ConditionalRequestConflict")));
        assert!(!is_write_conflict(Some("AccessDenied")));
        assert!(!is_write_conflict(None));
    }
}
