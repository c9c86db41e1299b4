//! In-process bucket used for tests and local-only runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{resolve_delete, resolve_upload, ObjectStore, RemoteError};

/// An `ObjectStore` that keeps objects in memory.
///
/// Clones share the same bucket, so a test can keep a handle for inspection
/// while the engine owns another.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Insert an object directly, bypassing the upload path.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.lock().insert(key.into(), bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, RemoteError> {
        let result = {
            let mut objects = self.lock();
            if objects.contains_key(key) {
                Err(RemoteError::Conflict(key.to_string()))
            } else {
                objects.insert(key.to_string(), bytes);
                Ok(())
            }
        };
        resolve_upload(key, result)
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        let result = match self.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(RemoteError::NotFound(key.to_string())),
        };
        resolve_delete(key, result)
    }

    async fn list(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.keys())
    }
}
