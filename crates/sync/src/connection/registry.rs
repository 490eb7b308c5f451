//! Open connections keyed by session.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::debug;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use relief_budget_core::SessionId;

use super::transport::Outbound;

/// An open duplex connection owned by the connection manager.
#[derive(Debug)]
pub struct RegisteredConnection {
    pub connection_id: Uuid,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
    pub(crate) tasks: Vec<AbortHandle>,
}

impl RegisteredConnection {
    pub(crate) fn send(&self, frame: Outbound) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Asks the transport for a normal close and stops the reader and
    /// heartbeat tasks.
    pub(crate) fn close(self) {
        let _ = self.outbound.send(Outbound::Close);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// At most one open connection per session id.
///
/// Written only by the connection manager that owns it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<SessionId, RegisteredConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection`, closing whatever was open for the session.
    pub(crate) fn insert(&self, session_id: SessionId, connection: RegisteredConnection) {
        let previous = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, connection);
        if let Some(previous) = previous {
            debug!(
                "Closing superseded connection {} for session {}",
                previous.connection_id, session_id
            );
            previous.close();
        }
    }

    pub(crate) fn remove(&self, session_id: &SessionId) -> Option<RegisteredConnection> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Removes the entry only if it still belongs to `connection_id`.
    pub(crate) fn remove_if_current(
        &self,
        session_id: &SessionId,
        connection_id: Uuid,
    ) -> Option<RegisteredConnection> {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match connections.get(session_id) {
            Some(existing) if existing.connection_id == connection_id => {
                connections.remove(session_id)
            }
            _ => None,
        }
    }

    /// Sends on the session's open connection.
    pub(crate) fn send(&self, session_id: &SessionId, frame: Outbound) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|connection| connection.send(frame))
            .unwrap_or(false)
    }

    pub(crate) fn attach_task(&self, session_id: &SessionId, connection_id: Uuid, task: AbortHandle) {
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match connections.get_mut(session_id) {
            Some(existing) if existing.connection_id == connection_id => existing.tasks.push(task),
            _ => task.abort(),
        }
    }

    pub fn is_open(&self, session_id: &SessionId) -> bool {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|connection| !connection.outbound.is_closed())
            .unwrap_or(false)
    }

    pub fn connection_id(&self, session_id: &SessionId) -> Option<Uuid> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|connection| connection.connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (RegisteredConnection, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            RegisteredConnection {
                connection_id: Uuid::new_v4(),
                outbound: tx,
                tasks: Vec::new(),
            },
            rx,
        )
    }

    #[test]
    fn test_one_connection_per_session() {
        let registry = ConnectionRegistry::new();
        let session = SessionId::new();
        let (first, mut first_rx) = connection();
        let (second, _second_rx) = connection();
        let second_id = second.connection_id;

        registry.insert(session, first);
        registry.insert(session, second);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_id(&session), Some(second_id));
        assert_eq!(first_rx.try_recv().ok(), Some(Outbound::Close));
    }

    #[test]
    fn test_remove_if_current_ignores_stale_ids() {
        let registry = ConnectionRegistry::new();
        let session = SessionId::new();
        let (conn, _rx) = connection();
        let id = conn.connection_id;
        registry.insert(session, conn);

        assert!(registry.remove_if_current(&session, Uuid::new_v4()).is_none());
        assert!(registry.is_open(&session));
        assert!(registry.remove_if_current(&session, id).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_receiver_is_not_open() {
        let registry = ConnectionRegistry::new();
        let session = SessionId::new();
        let (conn, rx) = connection();
        registry.insert(session, conn);
        drop(rx);
        assert!(!registry.is_open(&session));
        assert!(!registry.send(&session, Outbound::Close));
    }
}
