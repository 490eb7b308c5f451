//! Escalation notifications for administrators.

use relief_budget_core::notifications::{Notification, NotificationSink};

/// Writes notifications to the tracing log, where the portal's log shipping
/// picks them up.
#[derive(Clone, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::BudgetEscalation {
                mis,
                amount,
                category,
                session_id,
            } => tracing::warn!(
                target: "relief_budget::escalation",
                mis = %mis,
                amount = %amount,
                category = ?category,
                session = ?session_id,
                "Budget escalation required"
            ),
            Notification::ConnectionLost { attempts, message } => {
                tracing::warn!(attempts, "{}", message)
            }
            Notification::Announcement { message } => tracing::info!("{}", message),
        }
    }
}
