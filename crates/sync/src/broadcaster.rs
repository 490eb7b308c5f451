//! Debounced change broadcaster.
//!
//! Collapses a burst of local amount edits into one outbound
//! `broadcast-update` per project, sent once the burst has been quiet for the
//! debounce window and tagged with this session's id so the sender can ignore
//! the echo. Saves bypass the window through [`ChangeBroadcaster::broadcast_immediately`],
//! which carries no origin and therefore reaches every session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, warn};
use rust_decimal::Decimal;

use relief_budget_core::budget::{BudgetDelta, BudgetSnapshotStore};
use relief_budget_core::messages::{BroadcastUpdateRequest, BroadcastUpdateResponse};
use relief_budget_core::SessionId;

use crate::api::BudgetApi;
use crate::error::Result;
use crate::timer::TimerHandle;

struct PendingSend {
    generation: u64,
    timer: TimerHandle,
}

struct BroadcasterInner {
    session_id: SessionId,
    api: Arc<dyn BudgetApi>,
    store: Arc<BudgetSnapshotStore>,
    debounce: Duration,
    pending: Mutex<HashMap<String, PendingSend>>,
    generation: AtomicU64,
}

impl BroadcasterInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingSend>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, mis: &str, amount: Decimal, origin: Option<SessionId>) -> BroadcastUpdateRequest {
        BroadcastUpdateRequest {
            mis: mis.to_string(),
            amount,
            session_id: origin,
            simple_budget_data: self
                .store
                .snapshot(mis)
                .map(|snapshot| BudgetDelta::project(&snapshot, amount)),
        }
    }

    async fn fire(&self, mis: String, amount: Decimal, generation: u64) {
        {
            let mut pending = self.pending();
            match pending.get(&mis) {
                Some(entry) if entry.generation == generation => {
                    pending.remove(&mis);
                }
                _ => {
                    debug!("Skipping superseded broadcast for {}", mis);
                    return;
                }
            }
        }

        let request = self.request(&mis, amount, Some(self.session_id));
        match self.api.broadcast_update(&request).await {
            Ok(response) => debug!(
                "Broadcast amount {} for {} to {} recipient(s)",
                amount, mis, response.recipients
            ),
            Err(e) => warn!("Debounced broadcast for {} failed: {}", mis, e),
        }
    }
}

/// Coalesces local edits into debounced broadcasts.
pub struct ChangeBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl ChangeBroadcaster {
    pub fn new(
        session_id: SessionId,
        api: Arc<dyn BudgetApi>,
        store: Arc<BudgetSnapshotStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                session_id,
                api,
                store,
                debounce,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Schedules a broadcast of `amount` once edits to `mis` go quiet.
    ///
    /// A later call for the same project before the window elapses replaces
    /// this one.
    pub fn notify_amount_changed(&self, mis: &str, amount: Decimal) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak: Weak<BroadcasterInner> = Arc::downgrade(&self.inner);
        let key = mis.to_string();

        // Hold the map while scheduling so the timer cannot look before insert.
        let mut pending = self.inner.pending();
        let timer = TimerHandle::schedule(self.inner.debounce, async move {
            if let Some(inner) = weak.upgrade() {
                inner.fire(key, amount, generation).await;
            }
        });
        if let Some(previous) = pending.insert(mis.to_string(), PendingSend { generation, timer }) {
            previous.timer.cancel();
        }
    }

    /// Broadcasts `amount` to every session now, the sender included.
    ///
    /// Cancels any pending debounced send for the project.
    pub async fn broadcast_immediately(
        &self,
        mis: &str,
        amount: Decimal,
    ) -> Result<BroadcastUpdateResponse> {
        self.cancel(mis);
        let request = self.inner.request(mis, amount, None);
        self.inner.api.broadcast_update(&request).await
    }

    /// Cancels the pending debounced send for one project.
    pub fn cancel(&self, mis: &str) -> bool {
        let previous = self.inner.pending().remove(mis);
        match previous {
            Some(previous) => {
                previous.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending debounced send.
    pub fn cancel_pending(&self) {
        let drained: Vec<PendingSend> = self.inner.pending().drain().map(|(_, p)| p).collect();
        for pending in drained {
            pending.timer.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }
}

impl Drop for ChangeBroadcaster {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockBudgetApi;
    use relief_budget_core::budget::{BudgetFigures, BudgetSnapshot, Quarter};
    use relief_budget_core::cache::QueryCache;
    use rust_decimal_macros::dec;

    fn setup() -> (SessionId, Arc<MockBudgetApi>, Arc<BudgetSnapshotStore>, ChangeBroadcaster) {
        let session = SessionId::new();
        let api = Arc::new(MockBudgetApi::new());
        let store = Arc::new(BudgetSnapshotStore::new(Arc::new(QueryCache::new())));
        let broadcaster = ChangeBroadcaster::new(
            session,
            api.clone(),
            store.clone(),
            Duration::from_millis(300),
        );
        (session, api, store, broadcaster)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_last_value_once() {
        let (session, api, _store, broadcaster) = setup();

        for amount in [dec!(1), dec!(12), dec!(120), dec!(1200), dec!(12000)] {
            broadcaster.notify_amount_changed("5001234", amount);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(api.broadcasts().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let sent = api.broadcasts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, dec!(12000));
        assert_eq!(sent[0].session_id, Some(session));
        assert_eq!(broadcaster.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_projects_debounce_independently() {
        let (_session, api, _store, broadcaster) = setup();
        broadcaster.notify_amount_changed("5001234", dec!(10));
        broadcaster.notify_amount_changed("5009999", dec!(20));
        assert_eq!(broadcaster.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(api.broadcasts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_attached_when_snapshot_known() {
        let (_session, api, store, broadcaster) = setup();
        store.put(BudgetSnapshot::for_quarter(
            "5001234",
            BudgetFigures {
                user_view: dec!(1000),
                total_budget: dec!(20000),
                annual_credit: dec!(8000),
                annual_allocation: dec!(5000),
                ceiling: dec!(10000),
                quarterly: [dec!(2500); 4],
            },
            Quarter::Q3,
        ));

        broadcaster.notify_amount_changed("5001234", dec!(500));
        tokio::time::sleep(Duration::from_millis(301)).await;

        let delta = api.broadcasts()[0].simple_budget_data.clone().unwrap();
        assert_eq!(delta.available_budget, dec!(3500));
        assert_eq!(delta.yearly_available, dec!(6500));
        assert_eq!(delta.quarter_available, dec!(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_broadcast_has_no_origin_and_cancels_pending() {
        let (_session, api, _store, broadcaster) = setup();
        broadcaster.notify_amount_changed("5001234", dec!(900));

        let response = broadcaster
            .broadcast_immediately("5001234", dec!(950))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(broadcaster.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let sent = api.broadcasts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].session_id, None);
        assert_eq!(sent[0].amount, dec!(950));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_sends() {
        let (_session, api, _store, broadcaster) = setup();
        broadcaster.notify_amount_changed("5001234", dec!(900));
        drop(broadcaster);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(api.broadcasts().is_empty());
    }
}
