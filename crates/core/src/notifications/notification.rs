//! User-facing and administrative notification types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::budget::NotificationCategory;
use crate::session::SessionId;

/// Notifications raised by the sync runtime or the validation flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Transient message pushed by an administrator.
    Announcement { message: String },

    /// The server stayed unreachable after every reconnect attempt.
    /// Raised once per outage, never per attempt.
    ConnectionLost { attempts: u32, message: String },

    /// A validated amount needs administrative follow-up.
    BudgetEscalation {
        mis: String,
        amount: Decimal,
        category: NotificationCategory,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
}

impl Notification {
    pub fn announcement(message: impl Into<String>) -> Self {
        Self::Announcement {
            message: message.into(),
        }
    }

    pub fn connection_lost(attempts: u32) -> Self {
        Self::ConnectionLost {
            attempts,
            message: format!(
                "Live budget updates are unavailable after {} reconnect attempts",
                attempts
            ),
        }
    }

    pub fn budget_escalation(
        mis: impl Into<String>,
        amount: Decimal,
        category: NotificationCategory,
        session_id: Option<SessionId>,
    ) -> Self {
        Self::BudgetEscalation {
            mis: mis.into(),
            amount,
            category,
            session_id,
        }
    }
}
