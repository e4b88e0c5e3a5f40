//! Session Manager - restore at startup and write-through persistence
//!
//! Persisted state is a single JSON document: an array of
//! `[key, LearnedPattern]` pairs. Missing or unreadable state is never fatal;
//! the engine starts empty and keeps working from memory.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::pattern::{clamp_unit, LearnedPattern};
use super::store::PatternStore;
use crate::config::StorageConfig;
use crate::storage::{StorageBackend, StorageError};

/// Why a persisted payload could not be restored
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("persisted payload is empty")]
    Empty,

    #[error("persisted payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// On-storage representation of the whole pattern store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternSnapshot {
    pub entries: Vec<(String, LearnedPattern)>,
}

impl PatternSnapshot {
    pub fn new(entries: Vec<(String, LearnedPattern)>) -> Self {
        Self { entries }
    }

    /// Serialize for storage; a pattern holding non-finite numbers is
    /// refused rather than written as `null`
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        if let Some((key, _)) = self.entries.iter().find(|(_, p)| !p.values_in_range()) {
            return Err(serde::ser::Error::custom(format!(
                "pattern {} holds out-of-range values",
                key
            )));
        }
        serde_json::to_vec(&self.entries)
    }

    /// Parse a stored payload
    ///
    /// The payload must be an array of `[key, pattern]` pairs. Individual
    /// entries that do not hold a usable pattern are dropped with a warning
    /// so one bad entry cannot discard the rest.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SnapshotError::Empty);
        }
        let raw: Vec<(String, serde_json::Value)> = serde_json::from_slice(bytes)?;
        let total = raw.len();
        let entries: Vec<(String, LearnedPattern)> = raw
            .into_iter()
            .filter_map(|(key, value)| restore_entry(key, value))
            .collect();
        if entries.len() < total {
            warn!(
                "Dropped {} of {} persisted patterns as unusable",
                total - entries.len(),
                total
            );
        }
        Ok(Self { entries })
    }
}

fn restore_entry(key: String, value: serde_json::Value) -> Option<(String, LearnedPattern)> {
    let mut pattern: LearnedPattern = match serde_json::from_value(value) {
        Ok(pattern) => pattern,
        Err(e) => {
            warn!("Dropping persisted pattern {}: {}", key, e);
            return None;
        }
    };
    if pattern.key() != key {
        warn!(
            "Dropping persisted pattern {}: fields name {}",
            key,
            pattern.key()
        );
        return None;
    }
    if !pattern.values_in_range() {
        warn!("Dropping persisted pattern {}: values out of range", key);
        return None;
    }
    pattern.average_confidence = clamp_unit(pattern.average_confidence);
    Some((key, pattern))
}

pub struct SessionManager {
    storage: Arc<dyn StorageBackend>,
    store: Arc<PatternStore>,
    bucket: String,
    key: String,
    timeout: Duration,
    skip_initial_load: bool,
    initialized: OnceCell<()>,
    /// Held for the whole of a save; guards the last persisted revision
    save_lock: Mutex<Option<u64>>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        store: Arc<PatternStore>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            storage,
            store,
            bucket: config.bucket.clone(),
            key: config.key.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            skip_initial_load: config.skip_initial_load,
            initialized: OnceCell::new(),
            save_lock: Mutex::new(None),
        }
    }

    /// Restore persisted patterns once; later and concurrent calls wait for
    /// the first one and then return immediately
    pub async fn ensure_initialized(&self) {
        self.initialized
            .get_or_init(|| async {
                if self.skip_initial_load {
                    debug!("Skipping initial pattern load");
                    return;
                }
                self.restore().await;
            })
            .await;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    async fn restore(&self) {
        let bytes = match self.download().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                info!(
                    "No persisted patterns at {}/{} ({}), starting empty",
                    self.bucket,
                    self.key,
                    self.storage.name()
                );
                return;
            }
            Err(e) => {
                warn!(
                    "Failed to load persisted patterns from {}/{}: {}; starting empty",
                    self.bucket, self.key, e
                );
                return;
            }
        };

        match PatternSnapshot::decode(&bytes) {
            Ok(snapshot) => {
                let count = snapshot.entries.len();
                self.store.replace_all(snapshot.entries).await;
                info!("Restored {} learned patterns from {}", count, self.storage.name());
            }
            Err(e) => {
                warn!("Discarding persisted patterns: {}; starting empty", e);
            }
        }
    }

    async fn download(&self) -> Result<Option<Vec<u8>>, StorageError> {
        tokio::time::timeout(self.timeout, self.storage.download(&self.bucket, &self.key))
            .await
            .map_err(|_| StorageError::Timeout { seconds: self.timeout.as_secs() })?
    }

    /// Persist the current store if it changed since the last save
    ///
    /// Returns whether anything was written. The snapshot is taken after the
    /// save lock is acquired, so saves land in revision order.
    pub async fn save(&self) -> Result<bool, StorageError> {
        let mut persisted = self.save_lock.lock().await;
        let (revision, entries) = self.store.snapshot().await;

        let unchanged = match *persisted {
            Some(saved) => saved >= revision,
            None => revision == 0,
        };
        if unchanged {
            debug!("Pattern store unchanged since revision {}, not saving", revision);
            return Ok(false);
        }

        let count = entries.len();
        let bytes = PatternSnapshot::new(entries).encode()?;
        tokio::time::timeout(
            self.timeout,
            self.storage.upload(&self.bucket, &self.key, bytes),
        )
        .await
        .map_err(|_| StorageError::Timeout { seconds: self.timeout.as_secs() })??;

        *persisted = Some(revision);
        debug!("Saved {} patterns at revision {}", count, revision);
        Ok(true)
    }

    /// Save, logging instead of returning failures
    pub async fn save_logged(&self) {
        if let Err(e) = self.save().await {
            warn!(
                "Failed to persist learned patterns to {} ({}/{}): {}",
                self.storage.name(),
                self.bucket,
                self.key,
                e
            );
        }
    }

    /// Fire-and-forget save on the current runtime
    pub fn schedule_save(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.save_logged().await;
        });
    }
}
