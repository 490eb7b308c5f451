//! Routes inbound channel frames to cache invalidation and notifications.
//!
//! `dispatch` never fails and never blocks: malformed and unknown frames
//! are logged and reported through [`DispatchOutcome`] so the connection
//! read loop keeps running. Replaying a frame leaves the same end state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::budget::{BudgetSnapshotStore, PendingPreview};
use crate::cache::{CacheKey, QueryCache};
use crate::constants::NOTIFICATION_DEDUP_WINDOW;
use crate::messages::{Announcement, BroadcastMessage, Decoded, InboundMessage, MessageKind};
use crate::notifications::{Notification, NotificationSink};
use crate::session::SessionId;

/// What a dispatched frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Invalidated(CacheKey),
    /// Our own debounced budget broadcast came back; nothing to refresh.
    SelfEcho { mis: String },
    Notified,
    /// The same announcement was already surfaced.
    Duplicate,
    /// Connection-level frame with no cache effect.
    Acknowledged(MessageKind),
    Unrecognized(String),
    Malformed(String),
}

pub struct MessageDispatcher {
    session_id: SessionId,
    cache: Arc<QueryCache>,
    store: Arc<BudgetSnapshotStore>,
    notifier: Arc<dyn NotificationSink>,
    recent_announcements: Mutex<VecDeque<String>>,
}

impl MessageDispatcher {
    pub fn new(
        session_id: SessionId,
        cache: Arc<QueryCache>,
        store: Arc<BudgetSnapshotStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            session_id,
            cache,
            store,
            notifier,
            recent_announcements: Mutex::new(VecDeque::with_capacity(NOTIFICATION_DEDUP_WINDOW)),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Decodes and handles one raw text frame.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        match InboundMessage::decode(text) {
            Ok(Decoded::Known(message)) => self.handle(message),
            Ok(Decoded::Unknown(kind)) => {
                debug!("Ignoring unrecognized message type '{}'", kind);
                DispatchOutcome::Unrecognized(kind)
            }
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                DispatchOutcome::Malformed(e.to_string())
            }
        }
    }

    /// Handles an already decoded message.
    pub fn handle(&self, message: InboundMessage) -> DispatchOutcome {
        match message {
            InboundMessage::Connected(_) => DispatchOutcome::Acknowledged(MessageKind::Connected),
            InboundMessage::Pong => DispatchOutcome::Acknowledged(MessageKind::Pong),
            InboundMessage::BudgetUpdate(update) => self.on_budget_update(update),
            InboundMessage::ProjectUpdate(_) => self.invalidate(CacheKey::ProjectList),
            InboundMessage::DocumentUpdate(_) => self.invalidate(CacheKey::Documents),
            InboundMessage::AdminBroadcast(note) => self.on_announcement(note),
            InboundMessage::UserNotification(_) => self.invalidate(CacheKey::Notifications),
        }
    }

    fn on_budget_update(&self, update: BroadcastMessage) -> DispatchOutcome {
        if self
            .session_id
            .is_origin_of(update.origin_session_id.as_ref())
        {
            debug!("Suppressing self-originated budget update for {}", update.mis);
            return DispatchOutcome::SelfEcho { mis: update.mis };
        }

        if update.amount.is_some() || update.simple_budget_data.is_some() {
            self.store.record_preview(
                &update.mis,
                PendingPreview {
                    amount: update.amount,
                    origin: update.origin_session_id,
                    delta: update.simple_budget_data,
                    sent_at: update.timestamp,
                },
            );
        }
        self.invalidate(CacheKey::Budget(update.mis))
    }

    fn on_announcement(&self, note: Announcement) -> DispatchOutcome {
        // Without a timestamp two identical texts may be distinct broadcasts.
        if let Some(sent_at) = note.sent_at {
            let fingerprint = format!("{}|{}", sent_at.to_rfc3339(), note.message);
            let mut recent = self
                .recent_announcements
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if recent.contains(&fingerprint) {
                return DispatchOutcome::Duplicate;
            }
            if recent.len() == NOTIFICATION_DEDUP_WINDOW {
                recent.pop_front();
            }
            recent.push_back(fingerprint);
        }
        self.notifier.notify(Notification::announcement(note.message));
        DispatchOutcome::Notified
    }

    fn invalidate(&self, key: CacheKey) -> DispatchOutcome {
        if self.cache.invalidate(key.clone()) {
            debug!("Invalidated cache key {:?}", key);
        }
        DispatchOutcome::Invalidated(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetFigures, BudgetSnapshot, Quarter};
    use crate::notifications::MockNotificationSink;
    use rust_decimal_macros::dec;

    struct Fixture {
        session: SessionId,
        cache: Arc<QueryCache>,
        store: Arc<BudgetSnapshotStore>,
        sink: MockNotificationSink,
        dispatcher: MessageDispatcher,
    }

    fn fixture() -> Fixture {
        let session = SessionId::new();
        let cache = Arc::new(QueryCache::new());
        let store = Arc::new(BudgetSnapshotStore::new(cache.clone()));
        let sink = MockNotificationSink::new();
        let dispatcher =
            MessageDispatcher::new(session, cache.clone(), store.clone(), Arc::new(sink.clone()));
        store.put(BudgetSnapshot::for_quarter(
            "5001234",
            BudgetFigures {
                user_view: dec!(1000),
                total_budget: dec!(20000),
                annual_credit: dec!(8000),
                annual_allocation: dec!(5000),
                ceiling: dec!(10000),
                quarterly: [dec!(2000); 4],
            },
            Quarter::Q1,
        ));
        Fixture {
            session,
            cache,
            store,
            sink,
            dispatcher,
        }
    }

    fn budget_frame(origin: Option<SessionId>, amount: &str) -> String {
        let session = origin
            .map(|s| format!("\"{}\"", s))
            .unwrap_or_else(|| "null".to_string());
        format!(
            r#"{{"type":"budget_update","data":{{"mis":"5001234","amount":{},"sessionId":{},"simpleBudgetData":{{"availableBudget":3000,"quarterAvailable":100,"yearlyAvailable":6000}}}},"timestamp":"2026-05-04T09:30:00Z"}}"#,
            amount, session
        )
    }

    #[test]
    fn test_budget_update_from_other_session_invalidates_and_previews() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch(&budget_frame(Some(SessionId::new()), "900"));
        assert_eq!(
            outcome,
            DispatchOutcome::Invalidated(CacheKey::Budget("5001234".to_string()))
        );
        assert!(f.store.is_stale("5001234"));
        let preview = f.store.get("5001234").unwrap().preview.unwrap();
        assert_eq!(preview.amount, Some(dec!(900)));
        assert_eq!(preview.delta.unwrap().available_budget, dec!(3000));
    }

    #[test]
    fn test_own_debounced_update_is_suppressed() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch(&budget_frame(Some(f.session), "900"));
        assert_eq!(
            outcome,
            DispatchOutcome::SelfEcho {
                mis: "5001234".to_string()
            }
        );
        assert!(!f.store.is_stale("5001234"));
        assert!(f.store.get("5001234").unwrap().preview.is_none());
    }

    #[test]
    fn test_authoritative_update_is_never_suppressed() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch(&budget_frame(None, "900"));
        assert_eq!(
            outcome,
            DispatchOutcome::Invalidated(CacheKey::Budget("5001234".to_string()))
        );
        assert!(f.store.is_stale("5001234"));
    }

    #[test]
    fn test_replaying_a_message_is_idempotent() {
        let f = fixture();
        let frame = budget_frame(Some(SessionId::new()), "900");

        f.dispatcher.dispatch(&frame);
        let entry_once = f.store.get("5001234");
        let stale_once = f.cache.stale_keys();

        f.dispatcher.dispatch(&frame);
        assert_eq!(f.store.get("5001234"), entry_once);
        assert_eq!(f.cache.stale_keys(), stale_once);

        let admin = r#"{"type":"admin_broadcast","message":"Portal closes at 20:00","timestamp":"2026-05-04T09:30:00Z"}"#;
        assert_eq!(f.dispatcher.dispatch(admin), DispatchOutcome::Notified);
        assert_eq!(f.dispatcher.dispatch(admin), DispatchOutcome::Duplicate);
        assert_eq!(f.sink.len(), 1);
    }

    #[test]
    fn test_each_type_maps_to_one_key() {
        let f = fixture();
        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"project_update","data":{"mis":"5001234"}}"#),
            DispatchOutcome::Invalidated(CacheKey::ProjectList)
        );
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"document_update"}"#),
            DispatchOutcome::Invalidated(CacheKey::Documents)
        );
        assert_eq!(
            f.dispatcher
                .dispatch(r#"{"type":"user_notification","message":"New approval request"}"#),
            DispatchOutcome::Invalidated(CacheKey::Notifications)
        );
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"pong"}"#),
            DispatchOutcome::Acknowledged(MessageKind::Pong)
        );
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_admin_broadcast_surfaces_notification() {
        let f = fixture();
        f.dispatcher
            .dispatch(r#"{"type":"admin_broadcast","message":"Portal closes at 20:00"}"#);
        assert_eq!(
            f.sink.notifications(),
            vec![Notification::announcement("Portal closes at 20:00")]
        );
    }

    #[test]
    fn test_repeated_announcement_without_timestamp_is_shown_again() {
        let f = fixture();
        let admin = r#"{"type":"admin_broadcast","message":"Portal closes at 20:00"}"#;
        assert_eq!(f.dispatcher.dispatch(admin), DispatchOutcome::Notified);
        assert_eq!(f.dispatcher.dispatch(admin), DispatchOutcome::Notified);
        assert_eq!(f.sink.len(), 2);
    }

    #[test]
    fn test_data_only_user_notification_refreshes_list() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch(
            r#"{"type":"user_notification","data":{"userId":7},"timestamp":"2026-05-04T09:30:00Z"}"#,
        );
        assert_eq!(outcome, DispatchOutcome::Invalidated(CacheKey::Notifications));
        assert!(f.cache.is_stale(&CacheKey::Notifications));
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_unknown_and_malformed_frames_do_not_touch_state() {
        let f = fixture();
        assert_eq!(
            f.dispatcher.dispatch(r#"{"type":"presence","data":{}}"#),
            DispatchOutcome::Unrecognized("presence".to_string())
        );
        assert!(matches!(
            f.dispatcher.dispatch("{broken"),
            DispatchOutcome::Malformed(_)
        ));
        assert!(f.cache.stale_keys().is_empty());
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_update_for_unwatched_project_only_invalidates() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch(
            r#"{"type":"budget_update","data":{"mis":"7777777","amount":5,"sessionId":null}}"#,
        );
        assert_eq!(
            outcome,
            DispatchOutcome::Invalidated(CacheKey::Budget("7777777".to_string()))
        );
        assert!(f.store.get("7777777").is_none());
    }
}
