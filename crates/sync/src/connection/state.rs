//! Connection lifecycle state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use relief_budget_core::SessionId;

/// Lifecycle of the session's duplex connection.
///
/// `Disconnected` is both the initial state and the terminal state after an
/// intentional close or logout. `Error` means retries were exhausted or the
/// session disappeared; only an explicit `connect()` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

/// Whether the hosting view is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Snapshot of the current connection record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// New for every (re)connect attempt.
    pub connection_id: Option<Uuid>,
    pub session_id: SessionId,
    pub state: ConnectionState,
    pub retry_count: u32,
    pub last_activity: Option<DateTime<Utc>>,
}
