//! Duplex text channel abstraction and its WebSocket implementation.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{Result, SyncError};

/// WebSocket close code for an intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Frames written by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Close with code 1000.
    Close,
}

/// Why the channel ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseReason {
    /// `None` when the stream ended without a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseReason {
    pub fn normal() -> Self {
        Self {
            code: Some(NORMAL_CLOSURE),
            reason: String::new(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.code == Some(NORMAL_CLOSURE)
    }
}

/// Events read from the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    Closed(CloseReason),
}

/// An open duplex channel: send on `outbound`, read from `inbound`.
#[derive(Debug)]
pub struct DuplexChannel {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Opens duplex channels to the server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url, subprotocol: Option<&str>) -> Result<DuplexChannel>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url, subprotocol: Option<&str>) -> Result<DuplexChannel> {
        let mut request = url.as_str().into_client_request()?;
        if let Some(protocol) = subprotocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|_| SyncError::invalid_request("Invalid websocket subprotocol"))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!("WebSocket send failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closed".to_string().into(),
                        };
                        if let Err(e) = sink.send(Message::Close(Some(close))).await {
                            debug!("WebSocket close failed: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let reason = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(Inbound::Text(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => CloseReason {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            },
                            None => CloseReason::abnormal("close without status"),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::abnormal(e.to_string()),
                    None => break CloseReason::abnormal("stream ended"),
                }
            };
            let _ = inbound_tx.send(Inbound::Closed(reason));
        });

        Ok(DuplexChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Server end of a channel opened through [`MockConnector`].
#[derive(Debug)]
pub struct MockPeer {
    pub url: Url,
    pub subprotocol: Option<String>,
    /// Frames the client sent.
    pub sent: mpsc::UnboundedReceiver<Outbound>,
    /// Push frames to the client.
    pub push: mpsc::UnboundedSender<Inbound>,
}

impl MockPeer {
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push.send(Inbound::Text(text.into())).is_ok()
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.push.send(Inbound::Closed(reason)).is_ok()
    }

    /// Drains sent text frames.
    pub fn sent_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            if let Outbound::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }
}

/// In-memory [`Connector`] for tests.
#[derive(Debug, Default)]
pub struct MockConnector {
    peers: Mutex<Vec<MockPeer>>,
    attempts: Mutex<Vec<Url>>,
    opened: Mutex<usize>,
    refuse: Mutex<bool>,
    stall: Mutex<bool>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `open` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = refuse;
    }

    /// Makes every following `open` hang without ever answering.
    pub fn stall_connections(&self, stall: bool) {
        *self.stall.lock().unwrap_or_else(PoisonError::into_inner) = stall;
    }

    /// Number of `open` calls, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of channels successfully opened.
    pub fn open_count(&self) -> usize {
        *self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the most recently opened peer.
    pub fn take_last_peer(&self) -> Option<MockPeer> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url, subprotocol: Option<&str>) -> Result<DuplexChannel> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.clone());
        if *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(SyncError::connection("connection refused"));
        }
        if *self.stall.lock().unwrap_or_else(PoisonError::into_inner) {
            std::future::pending::<()>().await;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        *self.opened.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockPeer {
                url: url.clone(),
                subprotocol: subprotocol.map(str::to_string),
                sent: outbound_rx,
                push: inbound_tx,
            });
        Ok(DuplexChannel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_normal_only_for_1000() {
        assert!(CloseReason::normal().is_normal());
        assert!(!CloseReason::abnormal("reset").is_normal());
        assert!(!CloseReason {
            code: Some(1006),
            reason: String::new()
        }
        .is_normal());
    }

    #[tokio::test]
    async fn test_mock_connector_pairs_channels() {
        let connector = MockConnector::new();
        let url = Url::parse("ws://localhost/ws").unwrap();
        let mut channel = connector.open(&url, Some("budget.v1")).await.unwrap();
        let mut peer = connector.take_last_peer().unwrap();

        assert_eq!(peer.subprotocol.as_deref(), Some("budget.v1"));
        channel.outbound.send(Outbound::Text("hi".into())).unwrap();
        assert_eq!(peer.sent_texts(), vec!["hi".to_string()]);

        peer.push_text("pong");
        assert_eq!(channel.inbound.recv().await, Some(Inbound::Text("pong".into())));
    }

    #[tokio::test]
    async fn test_refused_connections_are_counted() {
        let connector = MockConnector::new();
        connector.refuse_connections(true);
        let url = Url::parse("ws://localhost/ws").unwrap();
        assert!(connector.open(&url, None).await.is_err());
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(connector.open_count(), 0);
    }
}
