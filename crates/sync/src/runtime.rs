//! One client session: cache, snapshot store, connection, broadcaster and
//! validator wired together.

use std::sync::Arc;

use log::{debug, info, warn};
use rust_decimal::Decimal;

use relief_budget_core::budget::BudgetSnapshotStore;
use relief_budget_core::cache::{CacheKey, QueryCache};
use relief_budget_core::dispatch::MessageDispatcher;
use relief_budget_core::notifications::NotificationSink;
use relief_budget_core::{BudgetSnapshot, SessionId, ValidationResult};

use crate::api::{BudgetApi, BudgetApiClient};
use crate::broadcaster::ChangeBroadcaster;
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, Connector, WsConnector};
use crate::error::Result;
use crate::validator::{BudgetValidator, ValidationOutcome};

/// Client runtime for a single session (one per tab).
pub struct BudgetSyncRuntime {
    session_id: SessionId,
    cache: Arc<QueryCache>,
    store: Arc<BudgetSnapshotStore>,
    api: Arc<dyn BudgetApi>,
    connection: ConnectionManager,
    broadcaster: ChangeBroadcaster,
    validator: BudgetValidator,
}

impl BudgetSyncRuntime {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn BudgetApi>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let session_id = SessionId::new();
        let cache = Arc::new(QueryCache::new());
        let store = Arc::new(BudgetSnapshotStore::new(cache.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            session_id,
            cache.clone(),
            store.clone(),
            notifier.clone(),
        ));
        let broadcaster =
            ChangeBroadcaster::new(session_id, api.clone(), store.clone(), config.debounce);
        let validator = BudgetValidator::new(session_id, api.clone(), store.clone());
        let connection = ConnectionManager::new(config, connector, dispatcher, notifier);

        Self {
            session_id,
            cache,
            store,
            api,
            connection,
            broadcaster,
            validator,
        }
    }

    /// Builds a runtime on reqwest and tokio-tungstenite.
    pub fn from_config(config: SyncConfig, notifier: Arc<dyn NotificationSink>) -> Result<Self> {
        let api = Arc::new(BudgetApiClient::new(config.clone())?);
        Ok(Self::new(config, api, Arc::new(WsConnector::new()), notifier))
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<BudgetSnapshotStore> {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Signs in with an externally issued session key and connects.
    pub async fn start(&self, session_key: impl Into<String>) {
        let key = session_key.into();
        self.api.set_session_key(Some(key.clone()));
        self.connection.set_session_key(Some(key));
        self.connection.connect().await;
        info!("Budget sync started for session {}", self.session_id);
    }

    /// Watches a project and returns its snapshot, fetching when missing or stale.
    pub async fn open_project(&self, mis: &str) -> Result<BudgetSnapshot> {
        self.connection.subscribe_project(mis);
        if let Some(snapshot) = self.store.snapshot(mis).filter(|_| !self.store.is_stale(mis)) {
            return Ok(snapshot);
        }
        self.refresh(mis).await
    }

    /// Refetches one project's snapshot.
    pub async fn refresh(&self, mis: &str) -> Result<BudgetSnapshot> {
        let snapshot = self.api.fetch_budget(mis).await?;
        self.store.put(snapshot);
        self.store
            .snapshot(mis)
            .ok_or_else(|| relief_budget_core::Error::SnapshotNotFound(mis.to_string()).into())
    }

    /// Refetches every watched project whose budget was invalidated.
    pub async fn refresh_stale(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .cache
            .stale_keys()
            .into_iter()
            .filter_map(|key| match key {
                CacheKey::Budget(mis) if self.store.contains(&mis) => Some(mis),
                _ => None,
            })
            .collect();

        let mut refreshed = Vec::with_capacity(stale.len());
        for mis in stale {
            match self.refresh(&mis).await {
                Ok(_) => refreshed.push(mis),
                Err(e) => warn!("Refetch of budget {} failed: {}", mis, e),
            }
        }
        refreshed
    }

    /// Stops watching a project and evicts its snapshot.
    pub fn close_project(&self, mis: &str) {
        self.connection.unsubscribe_project(mis);
        self.broadcaster.cancel(mis);
        self.store.evict(mis);
        debug!("Closed project {}", mis);
    }

    /// Local edit: validates immediately and schedules a debounced broadcast.
    pub fn edit_amount(&self, mis: &str, amount: Decimal) -> ValidationResult {
        let result = self.validator.validate_local(mis, amount);
        self.broadcaster.notify_amount_changed(mis, amount);
        result
    }

    /// Server validation before saving. When creation is allowed the amount
    /// is broadcast immediately to every session.
    pub async fn submit(&self, mis: &str, amount: Decimal) -> ValidationOutcome {
        let outcome = self.validator.validate(mis, amount).await;
        if outcome.can_create() {
            if let Err(e) = self.broadcaster.broadcast_immediately(mis, amount).await {
                warn!("Immediate broadcast for {} failed: {}", mis, e);
            }
        }
        outcome
    }

    /// Cancels pending broadcasts and closes the connection.
    pub fn shutdown(&self) {
        self.broadcaster.cancel_pending();
        self.connection.disconnect();
    }

    pub fn logout(&self) {
        self.broadcaster.cancel_pending();
        self.api.set_session_key(None);
        self.connection.logout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockBudgetApi;
    use crate::connection::{ConnectionState, MockConnector};
    use relief_budget_core::budget::{validate_against_snapshot, BudgetFigures, Quarter};
    use relief_budget_core::notifications::MockNotificationSink;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn snapshot() -> BudgetSnapshot {
        BudgetSnapshot::for_quarter(
            "5001234",
            BudgetFigures {
                user_view: dec!(1000),
                total_budget: dec!(20000),
                annual_credit: dec!(8000),
                annual_allocation: dec!(5000),
                ceiling: dec!(10000),
                quarterly: [dec!(2000); 4],
            },
            Quarter::Q2,
        )
    }

    fn runtime() -> (Arc<MockBudgetApi>, Arc<MockConnector>, BudgetSyncRuntime) {
        let api = Arc::new(MockBudgetApi::new());
        api.insert_snapshot(snapshot());
        let connector = Arc::new(MockConnector::new());
        let runtime = BudgetSyncRuntime::new(
            SyncConfig::new("http://budget.test"),
            api.clone(),
            connector.clone(),
            Arc::new(MockNotificationSink::new()),
        );
        (api, connector, runtime)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_project_fetches_once() {
        let (api, connector, runtime) = runtime();
        runtime.start("key").await;
        assert_eq!(runtime.connection().state(), ConnectionState::Connected);

        runtime.open_project("5001234").await.unwrap();
        runtime.open_project("5001234").await.unwrap();
        assert_eq!(api.fetches(), vec!["5001234".to_string()]);

        let mut peer = connector.take_last_peer().unwrap();
        assert!(peer
            .sent_texts()
            .iter()
            .any(|t| t.contains(r#""type":"subscribe""#)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_update_marks_stale_and_refresh_clears_it() {
        let (api, connector, runtime) = runtime();
        runtime.start("key").await;
        runtime.open_project("5001234").await.unwrap();
        let peer = connector.take_last_peer().unwrap();

        peer.push_text(
            r#"{"type":"budget_update","data":{"mis":"5001234","amount":700,"sessionId":null}}"#,
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(runtime.store().is_stale("5001234"));

        assert_eq!(runtime.refresh_stale().await, vec!["5001234".to_string()]);
        assert!(!runtime.store().is_stale("5001234"));
        assert_eq!(api.fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_then_submit() {
        let (api, _connector, runtime) = runtime();
        runtime.start("key").await;
        runtime.open_project("5001234").await.unwrap();

        let local = runtime.edit_amount("5001234", dec!(900));
        assert!(local.can_create);

        api.push_validate_reply(Ok(validate_against_snapshot(dec!(900), &snapshot())));
        let outcome = runtime.submit("5001234", dec!(900)).await;
        assert!(outcome.can_create());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let sent = api.broadcasts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].session_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_submit_does_not_broadcast() {
        let (api, _connector, runtime) = runtime();
        runtime.start("key").await;
        runtime.open_project("5001234").await.unwrap();

        api.push_validate_reply(Ok(validate_against_snapshot(dec!(12000), &snapshot())));
        let outcome = runtime.submit("5001234", dec!(12000)).await;
        assert!(!outcome.can_create());
        assert!(api.broadcasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_project_evicts_snapshot() {
        let (_api, _connector, runtime) = runtime();
        runtime.start("key").await;
        runtime.open_project("5001234").await.unwrap();

        runtime.close_project("5001234");
        assert!(runtime.store().snapshot("5001234").is_none());
        assert!(runtime.connection().watched_projects().is_empty());
    }
}
