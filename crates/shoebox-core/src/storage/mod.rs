//! Remote object storage backends.
//!
//! The sync engine talks to a bucket through [`ObjectStore`]. Uploads and
//! deletes are idempotent at this layer: an upload that collides with an
//! existing object resolves to that object's key, and deleting an object that
//! is already gone succeeds.

mod memory;
mod r2;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryObjectStore;
pub use r2::{R2Config, R2ObjectStore};

/// Failures reported by an object store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The object already exists.
    #[error("Remote object already exists: {0}")]
    Conflict(String),
    /// The object does not exist.
    #[error("Remote object not found: {0}")]
    NotFound(String),
    /// Transport failure or timeout; worth retrying once connectivity returns.
    #[error("Network error: {0}")]
    Network(String),
    /// The backend rejected the request.
    #[error("Remote server error: {0}")]
    Server(String),
}

impl RemoteError {
    /// Whether the failure is transient and should be retried silently.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Bucket operations used by the sync engine.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the key the object lives at.
    ///
    /// An existing object under `key` is not overwritten and counts as success.
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, RemoteError>;

    /// Remove the object under `key`. A missing object counts as success.
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// All object keys currently in the bucket.
    async fn list(&self) -> Result<Vec<String>, RemoteError>;
}

/// Fold an upload `Conflict` into success, as required for retried uploads.
pub(crate) fn resolve_upload(
    key: &str,
    result: Result<(), RemoteError>,
) -> Result<String, RemoteError> {
    match result {
        Ok(()) => Ok(key.to_string()),
        Err(RemoteError::Conflict(_)) => {
            tracing::debug!("Object {key} already exists remotely; treating upload as done");
            Ok(key.to_string())
        }
        Err(error) => Err(error),
    }
}

/// Fold a delete `NotFound` into success.
pub(crate) fn resolve_delete(key: &str, result: Result<(), RemoteError>) -> Result<(), RemoteError> {
    match result {
        Err(RemoteError::NotFound(_)) => {
            tracing::debug!("Object {key} already gone remotely");
            Ok(())
        }
        other => other,
    }
}
