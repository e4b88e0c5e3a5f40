//! Storage port for persisted pattern state
//!
//! Backends:
//! - Memory: deterministic, process-local (tests, ephemeral engines)
//! - Local: files under a data directory
//! - Object: HTTP object storage (production)

pub mod local;
pub mod memory;
pub mod object;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use object::{ObjectStorage, ObjectStorageConfig};

use crate::config::{StorageBackendKind, StorageConfig};

/// Failure talking to a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("storage returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("storage call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("storage misconfigured: {0}")]
    Config(String),

    #[error("failed to encode pattern snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Two-operation capability the engine persists through
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `bytes` under `bucket/key`, replacing any previous object
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Read `bucket/key`; `Ok(None)` when the object does not exist
    async fn download(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the backend selected in configuration
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        StorageBackendKind::Memory => Arc::new(MemoryStorage::new()),
        StorageBackendKind::Local => {
            let root = match &config.local_root {
                Some(root) => root.clone(),
                None => crate::config::data_dir()
                    .map_err(|e| StorageError::Config(e.to_string()))?
                    .join("storage"),
            };
            Arc::new(LocalStorage::new(root))
        }
        StorageBackendKind::Object => {
            let object_config = ObjectStorageConfig::from_storage_config(config)?;
            Arc::new(ObjectStorage::new(object_config)?)
        }
    };
    Ok(backend)
}
