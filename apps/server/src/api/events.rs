use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use relief_budget_core::messages::{BroadcastUpdateResponse, Decoded, Frame, InboundMessage};

use crate::{
    error::{ApiError, ApiResult},
    hub::Audience,
    main_lib::AppState,
};

/// Publishes a frame from another part of the portal (project or document
/// CRUD, administrator announcements) to connected sessions.
async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(frame): Json<Frame>,
) -> ApiResult<Json<BroadcastUpdateResponse>> {
    let message = match InboundMessage::from_frame(frame)? {
        Decoded::Known(message) => message,
        Decoded::Unknown(kind) => {
            return Err(ApiError::BadRequest(format!("Unknown event type '{}'", kind)))
        }
    };

    let recipients = match message {
        InboundMessage::BudgetUpdate(update) => state.hub.broadcast_budget(update)?,
        InboundMessage::ProjectUpdate(ref change) | InboundMessage::DocumentUpdate(ref change) => {
            let audience = match &change.mis {
                Some(mis) => Audience::Project(mis.clone()),
                None => Audience::Everyone,
            };
            state.hub.publish(&message, &audience)?
        }
        InboundMessage::AdminBroadcast(_) | InboundMessage::UserNotification(_) => {
            state.hub.publish(&message, &Audience::Everyone)?
        }
        InboundMessage::Connected(_) | InboundMessage::Pong => {
            return Err(ApiError::BadRequest(format!(
                "'{}' frames cannot be published",
                message.kind().as_str()
            )))
        }
    };

    Ok(Json(BroadcastUpdateResponse {
        success: true,
        recipients,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", post(publish_event))
}
