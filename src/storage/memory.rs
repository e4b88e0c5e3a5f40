//! In-memory storage backend

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{StorageBackend, StorageError};

/// Process-local object map keyed by `(bucket, key)`
///
/// Clones share the same objects, so a test can hand one clone to an engine
/// and inspect or pre-seed through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let objects = self.objects.read().await;
        Ok(objects.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
