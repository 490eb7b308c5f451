//! Duplex channel frames.
//!
//! Server to client frames share one envelope
//! `{type, data?, message?, timestamp?}`. The `type` string is decoded into
//! the closed [`InboundMessage`] enum; unknown types survive decoding as
//! [`Decoded::Unknown`] so newer servers do not break older clients.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::BudgetDelta;
use crate::errors::{Error, Result};
use crate::session::SessionId;

/// Recognized server to client frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connected,
    Pong,
    BudgetUpdate,
    ProjectUpdate,
    DocumentUpdate,
    AdminBroadcast,
    UserNotification,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Connected,
        MessageKind::Pong,
        MessageKind::BudgetUpdate,
        MessageKind::ProjectUpdate,
        MessageKind::DocumentUpdate,
        MessageKind::AdminBroadcast,
        MessageKind::UserNotification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Connected => "connected",
            MessageKind::Pong => "pong",
            MessageKind::BudgetUpdate => "budget_update",
            MessageKind::ProjectUpdate => "project_update",
            MessageKind::DocumentUpdate => "document_update",
            MessageKind::AdminBroadcast => "admin_broadcast",
            MessageKind::UserNotification => "user_notification",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

/// Raw frame envelope as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A budget change fanned out to every session viewing the project.
///
/// `session_id` is the origin. `None` marks an authoritative update that every
/// session, sender included, must apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub mis: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default, rename = "sessionId")]
    pub origin_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_budget_data: Option<BudgetDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BroadcastMessage {
    pub fn is_authoritative(&self) -> bool {
        self.origin_session_id.is_none()
    }
}

/// Server handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedInfo {
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// A project or document changed somewhere in the portal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Transient text shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub message: String,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Per-user notification push. The text is optional; receivers refresh
/// their notification list either way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserNotice {
    pub message: Option<String>,
    pub data: Option<Value>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Decoded server to client message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Connected(ConnectedInfo),
    Pong,
    BudgetUpdate(BroadcastMessage),
    ProjectUpdate(ResourceChange),
    DocumentUpdate(ResourceChange),
    AdminBroadcast(Announcement),
    UserNotification(UserNotice),
}

/// Result of decoding a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(InboundMessage),
    Unknown(String),
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::Connected(_) => MessageKind::Connected,
            InboundMessage::Pong => MessageKind::Pong,
            InboundMessage::BudgetUpdate(_) => MessageKind::BudgetUpdate,
            InboundMessage::ProjectUpdate(_) => MessageKind::ProjectUpdate,
            InboundMessage::DocumentUpdate(_) => MessageKind::DocumentUpdate,
            InboundMessage::AdminBroadcast(_) => MessageKind::AdminBroadcast,
            InboundMessage::UserNotification(_) => MessageKind::UserNotification,
        }
    }

    /// Decodes raw frame text.
    pub fn decode(text: &str) -> Result<Decoded> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| Error::MalformedMessage(format!("not a frame: {}", e)))?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Decoded> {
        let Some(kind) = MessageKind::parse(&frame.kind) else {
            return Ok(Decoded::Unknown(frame.kind));
        };

        let message = match kind {
            MessageKind::Connected => {
                InboundMessage::Connected(data_or_default(frame.data, kind)?)
            }
            MessageKind::Pong => InboundMessage::Pong,
            MessageKind::BudgetUpdate => {
                let data = frame.data.ok_or_else(|| {
                    Error::MalformedMessage("budget_update without data".to_string())
                })?;
                let mut update: BroadcastMessage = decode_data(data, kind)?;
                if update.mis.trim().is_empty() {
                    return Err(Error::MalformedMessage(
                        "budget_update without project mis".to_string(),
                    ));
                }
                if update.timestamp.is_none() {
                    update.timestamp = frame.timestamp;
                }
                InboundMessage::BudgetUpdate(update)
            }
            MessageKind::ProjectUpdate => {
                InboundMessage::ProjectUpdate(data_or_default(frame.data, kind)?)
            }
            MessageKind::DocumentUpdate => {
                InboundMessage::DocumentUpdate(data_or_default(frame.data, kind)?)
            }
            MessageKind::AdminBroadcast => InboundMessage::AdminBroadcast(announcement(
                frame.message,
                frame.data,
                frame.timestamp,
                kind,
            )?),
            MessageKind::UserNotification => {
                let message = frame.message.or_else(|| message_in(frame.data.as_ref()));
                InboundMessage::UserNotification(UserNotice {
                    message,
                    data: frame.data.filter(|d| !d.is_null()),
                    sent_at: frame.timestamp,
                })
            }
        };

        Ok(Decoded::Known(message))
    }

    /// Builds the wire envelope for this message.
    pub fn to_frame(&self) -> Result<Frame> {
        let mut frame = Frame {
            kind: self.kind().as_str().to_string(),
            data: None,
            message: None,
            timestamp: Some(Utc::now()),
        };
        match self {
            InboundMessage::Connected(info) => frame.data = Some(serde_json::to_value(info)?),
            InboundMessage::Pong => {}
            InboundMessage::BudgetUpdate(update) => {
                frame.timestamp = update.timestamp.or(frame.timestamp);
                frame.data = Some(serde_json::to_value(update)?);
            }
            InboundMessage::ProjectUpdate(change) | InboundMessage::DocumentUpdate(change) => {
                frame.data = Some(serde_json::to_value(change)?)
            }
            InboundMessage::AdminBroadcast(note) => {
                frame.message = Some(note.message.clone());
                frame.timestamp = note.sent_at.or(frame.timestamp);
            }
            InboundMessage::UserNotification(notice) => {
                frame.message = notice.message.clone();
                frame.data = notice.data.clone();
                frame.timestamp = notice.sent_at.or(frame.timestamp);
            }
        }
        Ok(frame)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_frame()?)?)
    }
}

fn decode_data<T: DeserializeOwned>(data: Value, kind: MessageKind) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::MalformedMessage(format!("invalid {} payload: {}", kind.as_str(), e)))
}

fn data_or_default<T: DeserializeOwned + Default>(
    data: Option<Value>,
    kind: MessageKind,
) -> Result<T> {
    match data {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => decode_data(value, kind),
    }
}

fn message_in(data: Option<&Value>) -> Option<String> {
    data.and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn announcement(
    message: Option<String>,
    data: Option<Value>,
    sent_at: Option<DateTime<Utc>>,
    kind: MessageKind,
) -> Result<Announcement> {
    let text = message.or_else(|| message_in(data.as_ref()));
    match text {
        Some(message) => Ok(Announcement { message, sent_at }),
        None => Err(Error::MalformedMessage(format!(
            "{} without message",
            kind.as_str()
        ))),
    }
}

/// Client to server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Initial handshake sent on every open.
    Hello {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        client: String,
        version: u32,
    },
    Subscribe {
        mis: String,
    },
    Unsubscribe {
        mis: String,
    },
    Ping,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
