//! Query cache invalidation state.
//!
//! Views refetch whatever is stale. Only the message dispatcher marks keys
//! stale (`invalidate` is crate-private); anyone may mark a key fresh after
//! refetching it.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::constants::CACHE_EVENT_CAPACITY;

/// Identifies one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "mis", rename_all = "snake_case")]
pub enum CacheKey {
    /// Budget snapshot of one project.
    Budget(String),
    ProjectList,
    Documents,
    Notifications,
}

/// Change notifications for cache consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Invalidated(CacheKey),
    Refreshed(CacheKey),
    Evicted(CacheKey),
}

/// Tracks which cached queries must be refetched.
pub struct QueryCache {
    stale: RwLock<HashSet<CacheKey>>,
    events: broadcast::Sender<CacheEvent>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _receiver) = broadcast::channel(CACHE_EVENT_CAPACITY);
        Self {
            stale: RwLock::new(HashSet::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.stale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn stale_keys(&self) -> Vec<CacheKey> {
        self.stale
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Marks a key as refetched.
    pub fn mark_fresh(&self, key: &CacheKey) {
        self.stale
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.publish(CacheEvent::Refreshed(key.clone()));
    }

    /// Marks a key stale. Returns true if it was fresh before.
    pub(crate) fn invalidate(&self, key: CacheKey) -> bool {
        let newly_stale = self
            .stale
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        self.publish(CacheEvent::Invalidated(key));
        newly_stale
    }

    pub(crate) fn forget(&self, key: &CacheKey) {
        self.stale
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.publish(CacheEvent::Evicted(key.clone()));
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}
