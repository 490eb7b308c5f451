//! Fan-out of channel frames to open WebSocket connections.
//!
//! Connections subscribe to projects by MIS. A budget update reaches every
//! connection watching the project except those owned by the originating
//! session; an update without origin reaches all of them.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use relief_budget_core::messages::{BroadcastMessage, InboundMessage};
use relief_budget_core::SessionId;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Server-side id of one WebSocket connection.
pub type ConnectionId = Uuid;

struct HubConnection {
    session_id: Option<SessionId>,
    sender: mpsc::UnboundedSender<String>,
    projects: HashSet<String>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, HubConnection>,
    projects: HashMap<String, HashSet<ConnectionId>>,
}

/// Where a published frame should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every open connection.
    Everyone,
    /// Connections subscribed to the project.
    Project(String),
}

#[derive(Default)]
pub struct SessionHub {
    inner: RwLock<HubInner>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HubInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection and returns the receiving end of its outbound queue.
    pub fn register(
        &self,
        session_id: Option<SessionId>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        self.write().connections.insert(
            connection_id,
            HubConnection {
                session_id,
                sender,
                projects: HashSet::new(),
            },
        );
        debug!("Registered connection {} for session {:?}", connection_id, session_id);
        (connection_id, receiver)
    }

    /// Drops a connection and all of its subscriptions.
    pub fn unregister(&self, connection_id: ConnectionId) {
        let mut inner = self.write();
        let Some(connection) = inner.connections.remove(&connection_id) else {
            return;
        };
        for mis in connection.projects {
            if let Some(watchers) = inner.projects.get_mut(&mis) {
                watchers.remove(&connection_id);
                if watchers.is_empty() {
                    inner.projects.remove(&mis);
                }
            }
        }
        debug!("Unregistered connection {}", connection_id);
    }

    /// Binds the session announced in a `hello` frame.
    pub fn identify(&self, connection_id: ConnectionId, session_id: SessionId) {
        if let Some(connection) = self.write().connections.get_mut(&connection_id) {
            connection.session_id = Some(session_id);
        }
    }

    pub fn subscribe(&self, connection_id: ConnectionId, mis: &str) -> bool {
        let mut inner = self.write();
        let Some(connection) = inner.connections.get_mut(&connection_id) else {
            return false;
        };
        connection.projects.insert(mis.to_string());
        inner
            .projects
            .entry(mis.to_string())
            .or_default()
            .insert(connection_id);
        true
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId, mis: &str) {
        let mut inner = self.write();
        if let Some(connection) = inner.connections.get_mut(&connection_id) {
            connection.projects.remove(mis);
        }
        if let Some(watchers) = inner.projects.get_mut(mis) {
            watchers.remove(&connection_id);
            if watchers.is_empty() {
                inner.projects.remove(mis);
            }
        }
    }

    /// Queues a pre-encoded frame for one connection.
    pub fn send_to(&self, connection_id: ConnectionId, text: String) -> bool {
        self.read()
            .connections
            .get(&connection_id)
            .is_some_and(|connection| connection.sender.send(text).is_ok())
    }

    /// Fans a budget update out to the project's watchers and returns the
    /// number of connections it was queued for.
    pub fn broadcast_budget(&self, update: BroadcastMessage) -> relief_budget_core::Result<usize> {
        let mis = update.mis.clone();
        let origin = update.origin_session_id;
        let text = InboundMessage::BudgetUpdate(update).encode()?;

        let inner = self.read();
        let Some(watchers) = inner.projects.get(&mis) else {
            debug!("No watchers for budget update on {}", mis);
            return Ok(0);
        };
        let recipients = watchers
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|connection| match origin {
                Some(origin) => connection.session_id != Some(origin),
                None => true,
            })
            .filter(|connection| connection.sender.send(text.clone()).is_ok())
            .count();
        debug!(
            "Budget update for {} queued for {} connection(s), origin {:?}",
            mis, recipients, origin
        );
        Ok(recipients)
    }

    /// Publishes any other frame to the given audience.
    pub fn publish(
        &self,
        message: &InboundMessage,
        audience: &Audience,
    ) -> relief_budget_core::Result<usize> {
        let text = message.encode()?;
        let inner = self.read();
        let recipients = match audience {
            Audience::Everyone => inner
                .connections
                .values()
                .filter(|connection| connection.sender.send(text.clone()).is_ok())
                .count(),
            Audience::Project(mis) => inner
                .projects
                .get(mis)
                .map(|watchers| {
                    watchers
                        .iter()
                        .filter_map(|id| inner.connections.get(id))
                        .filter(|connection| connection.sender.send(text.clone()).is_ok())
                        .count()
                })
                .unwrap_or(0),
        };
        debug!(
            "Published {} to {:?}: {} connection(s)",
            message.kind().as_str(),
            audience,
            recipients
        );
        Ok(recipients)
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    pub fn watcher_count(&self, mis: &str) -> usize {
        self.read().projects.get(mis).map_or(0, HashSet::len)
    }

    pub fn watched_projects(&self) -> usize {
        self.read().projects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_budget_core::messages::{Announcement, Decoded};
    use rust_decimal_macros::dec;

    fn update(mis: &str, origin: Option<SessionId>) -> BroadcastMessage {
        BroadcastMessage {
            mis: mis.to_string(),
            amount: Some(dec!(750)),
            origin_session_id: origin,
            simple_budget_data: None,
            timestamp: None,
        }
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_origin_session_is_excluded() {
        let hub = SessionHub::new();
        let sender = SessionId::new();
        let (a, mut rx_a) = hub.register(Some(sender));
        let (b, mut rx_b) = hub.register(Some(SessionId::new()));
        hub.subscribe(a, "5001234");
        hub.subscribe(b, "5001234");

        assert_eq!(hub.broadcast_budget(update("5001234", Some(sender))).unwrap(), 1);
        assert!(drain(&mut rx_a).is_empty());
        let frames = drain(&mut rx_b);
        assert_eq!(frames.len(), 1);
        let Decoded::Known(InboundMessage::BudgetUpdate(received)) =
            InboundMessage::decode(&frames[0]).unwrap()
        else {
            panic!("Expected budget update");
        };
        assert_eq!(received.origin_session_id, Some(sender));
    }

    #[test]
    fn test_null_origin_reaches_sender_too() {
        let hub = SessionHub::new();
        let sender = SessionId::new();
        let (a, mut rx_a) = hub.register(Some(sender));
        let (b, _rx_b) = hub.register(None);
        hub.subscribe(a, "5001234");
        hub.subscribe(b, "5001234");

        assert_eq!(hub.broadcast_budget(update("5001234", None)).unwrap(), 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn test_only_project_watchers_receive_updates() {
        let hub = SessionHub::new();
        let (a, _rx_a) = hub.register(None);
        let (_b, mut rx_b) = hub.register(None);
        hub.subscribe(a, "5001234");

        assert_eq!(hub.broadcast_budget(update("5001234", None)).unwrap(), 1);
        assert_eq!(hub.broadcast_budget(update("5009999", None)).unwrap(), 0);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_unregister_clears_subscriptions() {
        let hub = SessionHub::new();
        let (a, _rx_a) = hub.register(None);
        hub.subscribe(a, "5001234");
        assert_eq!(hub.watcher_count("5001234"), 1);

        hub.unregister(a);
        assert_eq!(hub.watcher_count("5001234"), 0);
        assert_eq!(hub.watched_projects(), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.subscribe(a, "5001234"));
    }

    #[test]
    fn test_identify_enables_echo_exclusion() {
        let hub = SessionHub::new();
        let session = SessionId::new();
        let (a, _rx_a) = hub.register(None);
        hub.subscribe(a, "5001234");
        hub.identify(a, session);

        assert_eq!(hub.broadcast_budget(update("5001234", Some(session))).unwrap(), 0);
    }

    #[test]
    fn test_announcement_reaches_everyone() {
        let hub = SessionHub::new();
        let (_a, mut rx_a) = hub.register(None);
        let (_b, mut rx_b) = hub.register(None);
        let note = InboundMessage::AdminBroadcast(Announcement {
            message: "Maintenance at 18:00".to_string(),
            sent_at: None,
        });

        assert_eq!(hub.publish(&note, &Audience::Everyone).unwrap(), 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_closed_receivers_are_not_counted() {
        let hub = SessionHub::new();
        let (a, rx_a) = hub.register(None);
        hub.subscribe(a, "5001234");
        drop(rx_a);

        assert_eq!(hub.broadcast_budget(update("5001234", None)).unwrap(), 0);
        assert!(!hub.send_to(a, "{}".to_string()));
    }
}
