//! In-memory store of last-known budget snapshots per project.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;

use super::budget_model::{BudgetDelta, BudgetSnapshot};
use crate::cache::{CacheKey, QueryCache};
use crate::session::SessionId;

/// Another session's pending amount, shown until the next authoritative fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPreview {
    pub amount: Option<Decimal>,
    pub origin: Option<SessionId>,
    pub delta: Option<BudgetDelta>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub snapshot: BudgetSnapshot,
    pub preview: Option<PendingPreview>,
}

/// Snapshot cache keyed by MIS code.
///
/// Created on first fetch, refreshed by fetches and validation responses,
/// evicted when the project view closes. Staleness is tracked by the shared
/// [`QueryCache`] under [`CacheKey::Budget`].
pub struct BudgetSnapshotStore {
    entries: RwLock<HashMap<String, SnapshotEntry>>,
    cache: Arc<QueryCache>,
}

impl BudgetSnapshotStore {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache,
        }
    }

    pub fn get(&self, mis: &str) -> Option<SnapshotEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(mis)
            .cloned()
    }

    pub fn snapshot(&self, mis: &str) -> Option<BudgetSnapshot> {
        self.get(mis).map(|entry| entry.snapshot)
    }

    pub fn contains(&self, mis: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(mis)
    }

    pub fn is_stale(&self, mis: &str) -> bool {
        self.cache.is_stale(&CacheKey::Budget(mis.to_string()))
    }

    /// Whether the project needs a fetch before it can be trusted.
    pub fn needs_fetch(&self, mis: &str) -> bool {
        !self.contains(mis) || self.is_stale(mis)
    }

    /// Stores an authoritative snapshot, dropping any pending preview.
    pub fn put(&self, mut snapshot: BudgetSnapshot) {
        snapshot.recompute();
        let mis = snapshot.mis.clone();
        debug!("Refreshing budget snapshot for project {}", mis);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                mis.clone(),
                SnapshotEntry {
                    snapshot,
                    preview: None,
                },
            );
        self.cache.mark_fresh(&CacheKey::Budget(mis));
    }

    /// Drops the project's snapshot when its view closes.
    pub fn evict(&self, mis: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(mis)
            .is_some();
        if removed {
            self.cache.forget(&CacheKey::Budget(mis.to_string()));
        }
        removed
    }

    pub fn projects(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Records a preview from another session. Only known projects keep one.
    pub(crate) fn record_preview(&self, mis: &str, preview: PendingPreview) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(mis) {
            Some(entry) => {
                entry.preview = Some(preview);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetFigures, Quarter};
    use rust_decimal_macros::dec;

    fn snapshot(mis: &str, user_view: Decimal) -> BudgetSnapshot {
        BudgetSnapshot::for_quarter(
            mis,
            BudgetFigures {
                user_view,
                total_budget: dec!(20000),
                annual_credit: dec!(8000),
                annual_allocation: dec!(5000),
                ceiling: dec!(10000),
                quarterly: [dec!(1250); 4],
            },
            Quarter::Q2,
        )
    }

    fn store() -> (Arc<QueryCache>, BudgetSnapshotStore) {
        let cache = Arc::new(QueryCache::new());
        let store = BudgetSnapshotStore::new(cache.clone());
        (cache, store)
    }

    #[test]
    fn test_first_fetch_creates_entry() {
        let (_, store) = store();
        assert!(store.needs_fetch("5001234"));
        store.put(snapshot("5001234", dec!(100)));
        assert!(!store.needs_fetch("5001234"));
        assert_eq!(
            store.snapshot("5001234").unwrap().available_budget,
            dec!(4900)
        );
    }

    #[test]
    fn test_put_clears_preview_and_staleness() {
        let (cache, store) = store();
        store.put(snapshot("5001234", dec!(100)));
        assert!(store.record_preview(
            "5001234",
            PendingPreview {
                amount: Some(dec!(700)),
                origin: None,
                delta: None,
                sent_at: None,
            }
        ));
        cache.invalidate(CacheKey::Budget("5001234".to_string()));
        assert!(store.needs_fetch("5001234"));

        store.put(snapshot("5001234", dec!(800)));
        let entry = store.get("5001234").unwrap();
        assert!(entry.preview.is_none());
        assert!(!store.is_stale("5001234"));
        assert_eq!(entry.snapshot.figures.user_view, dec!(800));
    }

    #[test]
    fn test_preview_ignored_for_unknown_project() {
        let (_, store) = store();
        assert!(!store.record_preview(
            "9999999",
            PendingPreview {
                amount: Some(dec!(1)),
                origin: None,
                delta: None,
                sent_at: None,
            }
        ));
        assert!(store.get("9999999").is_none());
    }

    #[test]
    fn test_evict_discards_snapshot() {
        let (cache, store) = store();
        store.put(snapshot("5001234", dec!(0)));
        cache.invalidate(CacheKey::Budget("5001234".to_string()));
        assert!(store.evict("5001234"));
        assert!(!store.evict("5001234"));
        assert!(store.projects().is_empty());
        assert!(!cache.is_stale(&CacheKey::Budget("5001234".to_string())));
    }
}
