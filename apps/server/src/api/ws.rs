use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use relief_budget_core::messages::{ClientMessage, ConnectedInfo, InboundMessage};
use relief_budget_core::SessionId;
use serde::Deserialize;

use crate::{error::ApiError, hub::ConnectionId, main_lib::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default)]
    token: Option<String>,
}

async fn upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.accepts_token(params.token.as_deref()) {
        tracing::warn!("Rejected WebSocket upgrade with invalid token");
        return ApiError::Unauthorized.into_response();
    }
    let ws = match state.ws_subprotocol.clone() {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };
    let session_id = params.session_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: Option<SessionId>) {
    let (mut sink, mut stream) = socket.split();
    let (connection_id, mut outbound) = state.hub.register(session_id);

    match InboundMessage::Connected(ConnectedInfo { session_id }).encode() {
        Ok(text) => {
            state.hub.send_to(connection_id, text);
        }
        Err(e) => tracing::error!("Failed to encode connected frame: {}", e),
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_client_frame(&state, connection_id, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Connection {} read failed: {}", connection_id, e);
                break;
            }
        }
    }

    // Dropping the hub entry closes the outbound queue and ends the writer.
    state.hub.unregister(connection_id);
    let _ = writer.await;
}

fn handle_client_frame(state: &AppState, connection_id: ConnectionId, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Ignoring malformed frame from {}: {}", connection_id, e);
            return;
        }
    };

    match message {
        ClientMessage::Hello {
            session_id,
            client,
            version,
        } => {
            state.hub.identify(connection_id, session_id);
            tracing::info!(
                "Connection {} identified as session {} ({} v{})",
                connection_id,
                session_id,
                client,
                version
            );
        }
        ClientMessage::Subscribe { mis } => {
            state.hub.subscribe(connection_id, &mis);
        }
        ClientMessage::Unsubscribe { mis } => state.hub.unsubscribe(connection_id, &mis),
        ClientMessage::Ping => match InboundMessage::Pong.encode() {
            Ok(text) => {
                state.hub.send_to(connection_id, text);
            }
            Err(e) => tracing::error!("Failed to encode pong: {}", e),
        },
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(upgrade))
}
