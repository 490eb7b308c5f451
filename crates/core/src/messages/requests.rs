//! HTTP request and response bodies shared by the client and the server.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::wire::BroadcastMessage;
use crate::budget::BudgetDelta;
use crate::session::SessionId;

/// Body of `POST /budget/validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub mis: String,
    pub amount: Decimal,
    pub session_id: SessionId,
}

/// Body of `POST /budget/broadcast-update`.
///
/// `session_id: None` is serialized as `null` and asks the server to deliver
/// the update to every session, the sender included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastUpdateRequest {
    pub mis: String,
    pub amount: Decimal,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_budget_data: Option<BudgetDelta>,
}

impl BroadcastUpdateRequest {
    /// Converts the request into the message fanned out to sessions.
    pub fn into_message(self) -> BroadcastMessage {
        BroadcastMessage {
            mis: self.mis,
            amount: Some(self.amount),
            origin_session_id: self.session_id,
            simple_budget_data: self.simple_budget_data,
            timestamp: Some(chrono::Utc::now()),
        }
    }
}

/// Response of `POST /budget/broadcast-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastUpdateResponse {
    pub success: bool,
    /// Number of connections the update was delivered to.
    pub recipients: usize,
}
