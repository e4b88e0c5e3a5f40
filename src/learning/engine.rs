//! Pattern engine - the service object callers hold
//!
//! Owns the pattern store and the session manager. Operations are split by
//! concern across `feedback`, `advisor` and `analytics`, each adding an
//! `impl PatternEngine` block.

use std::sync::Arc;

use super::session::SessionManager;
use super::store::PatternStore;
use crate::config::{AdvisorConfig, Config, LearningConfig, StorageConfig};
use crate::storage::{self, MemoryStorage, StorageBackend, StorageError};

pub struct PatternEngine {
    pub(crate) learning: LearningConfig,
    pub(crate) advisor: AdvisorConfig,
    pub(crate) store: Arc<PatternStore>,
    pub(crate) session: Arc<SessionManager>,
    persist_in_background: bool,
}

impl PatternEngine {
    /// Create an engine persisting through `storage`
    pub fn new(storage: Arc<dyn StorageBackend>, config: Config) -> Self {
        let store = Arc::new(PatternStore::new());
        let session = Arc::new(SessionManager::new(storage, store.clone(), &config.storage));

        Self {
            learning: config.learning,
            advisor: config.advisor,
            store,
            session,
            persist_in_background: config.storage.persist_in_background,
        }
    }

    /// Create an engine with the storage backend named in `config`
    pub fn from_config(config: Config) -> Result<Self, StorageError> {
        let backend = storage::from_config(&config.storage)?;
        Ok(Self::new(backend, config))
    }

    /// Clean-slate engine over private in-memory storage, no initial load
    pub fn in_memory() -> Self {
        let config = Config {
            storage: StorageConfig {
                skip_initial_load: true,
                ..Default::default()
            },
            ..Default::default()
        };
        Self::new(Arc::new(MemoryStorage::new()), config)
    }

    /// Restore persisted state on first call; a no-op afterwards
    pub async fn ensure_initialized(&self) {
        self.session.ensure_initialized().await;
    }

    /// Persist the current state now and report the outcome
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.ensure_initialized().await;
        self.session.save().await.map(|_| ())
    }

    pub fn learning_config(&self) -> &LearningConfig {
        &self.learning
    }

    pub fn advisor_config(&self) -> &AdvisorConfig {
        &self.advisor
    }

    /// Write-through after a state change; failures are only logged
    pub(crate) async fn persist_after_mutation(&self) {
        if self.persist_in_background {
            self.session.schedule_save();
        } else {
            self.session.save_logged().await;
        }
    }
}
