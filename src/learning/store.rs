//! Pattern Store - in-process map of learned patterns
//!
//! All mutation goes through [`PatternStore::mutate`], which holds the write
//! guard for the whole read-modify-write. Concurrent updates to the same key
//! are therefore serialized and never lose an increment. Readers share the
//! read guard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use super::pattern::LearnedPattern;

pub type PatternMap = HashMap<String, LearnedPattern>;

/// Result of a store mutation that knows whether it changed anything
pub trait Mutation {
    fn changed(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: RwLock<PatternMap>,
    /// Bumped once per state-changing mutation, under the write guard
    revision: AtomicU64,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the map
    pub async fn mutate<R, F>(&self, f: F) -> R
    where
        R: Mutation,
        F: FnOnce(&mut PatternMap) -> R,
    {
        let mut patterns = self.patterns.write().await;
        let result = f(&mut patterns);
        if result.changed() {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Pattern store at revision {} ({} patterns)", revision, patterns.len());
        }
        result
    }

    /// Shared access for queries
    pub async fn read(&self) -> RwLockReadGuard<'_, PatternMap> {
        self.patterns.read().await
    }

    pub async fn get(&self, key: &str) -> Option<LearnedPattern> {
        self.patterns.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.patterns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.patterns.read().await.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Consistent copy of every entry, sorted by key, with its revision
    pub async fn snapshot(&self) -> (u64, Vec<(String, LearnedPattern)>) {
        let patterns = self.patterns.read().await;
        let revision = self.revision.load(Ordering::SeqCst);
        let mut entries: Vec<_> = patterns
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        (revision, entries)
    }

    /// Replace the whole map (session restore); does not bump the revision
    pub async fn replace_all(&self, entries: Vec<(String, LearnedPattern)>) {
        let mut patterns = self.patterns.write().await;
        *patterns = entries.into_iter().collect();
    }
}
