//! Connection manager: one de-duplicated duplex connection per session with
//! exponential-backoff reconnects.
//!
//! Every (re)connect attempt gets a fresh connection id. Reader, heartbeat
//! and timer callbacks carry the id they were started for and do nothing once
//! it is no longer current, so a late timer can never resurrect a connection
//! that was replaced or closed on purpose.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use relief_budget_core::constants::{CLIENT_NAME, PROTOCOL_VERSION};
use relief_budget_core::dispatch::MessageDispatcher;
use relief_budget_core::messages::ClientMessage;
use relief_budget_core::notifications::{Notification, NotificationSink};
use relief_budget_core::SessionId;

use super::registry::{ConnectionRegistry, RegisteredConnection};
use super::state::{ConnectionInfo, ConnectionState, Visibility};
use super::transport::{CloseReason, Connector, DuplexChannel, Inbound, Outbound};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::timer::TimerHandle;

struct ManagerState {
    session_key: Option<String>,
    state: ConnectionState,
    connection_id: Option<Uuid>,
    retry_count: u32,
    last_activity: Option<DateTime<Utc>>,
    reconnect_timer: Option<TimerHandle>,
    visibility_timer: Option<TimerHandle>,
    projects: BTreeSet<String>,
    loss_notified: bool,
}

struct ManagerInner {
    session_id: SessionId,
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<MessageDispatcher>,
    notifier: Arc<dyn NotificationSink>,
    registry: Arc<ConnectionRegistry>,
    state: Mutex<ManagerState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, st: &mut ManagerState, next: ConnectionState) {
        if st.state != next {
            debug!(
                "Connection state {} -> {}",
                st.state.as_str(),
                next.as_str()
            );
        }
        st.state = next;
        self.state_tx.send_replace(next);
    }

    fn current_connection(&self) -> Option<Uuid> {
        self.lock().connection_id
    }

    fn touch(&self, connection_id: Uuid) {
        let mut st = self.lock();
        if st.connection_id == Some(connection_id) {
            st.last_activity = Some(Utc::now());
        }
    }

    /// Stops timers and closes the open connection, if any.
    fn teardown(&self, st: &mut ManagerState) {
        if let Some(timer) = st.reconnect_timer.take() {
            timer.cancel();
        }
        st.connection_id = None;
        if let Some(connection) = self.registry.remove(&self.session_id) {
            connection.close();
        }
    }

    fn send(&self, message: &ClientMessage) -> bool {
        match message.encode() {
            Ok(text) => self.registry.send(&self.session_id, Outbound::Text(text)),
            Err(e) => {
                warn!("Failed to encode client message: {}", e);
                false
            }
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = st.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = st.visibility_timer.take() {
            timer.cancel();
        }
        if let Some(connection) = self.registry.remove(&self.session_id) {
            connection.close();
        }
    }
}

/// Owns the session's duplex connection and its reconnect state machine.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<MessageDispatcher>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_registry(
            config,
            connector,
            dispatcher,
            notifier,
            Arc::new(ConnectionRegistry::new()),
        )
    }

    pub fn with_registry(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<MessageDispatcher>,
        notifier: Arc<dyn NotificationSink>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                session_id: dispatcher.session_id(),
                config,
                connector,
                dispatcher,
                notifier,
                registry,
                state: Mutex::new(ManagerState {
                    session_key: None,
                    state: ConnectionState::Disconnected,
                    connection_id: None,
                    retry_count: 0,
                    last_activity: None,
                    reconnect_timer: None,
                    visibility_timer: None,
                    projects: BTreeSet::new(),
                    loss_notified: false,
                }),
                state_tx,
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected() && self.inner.registry.is_open(&self.inner.session_id)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        let st = self.inner.lock();
        ConnectionInfo {
            connection_id: st.connection_id,
            session_id: self.inner.session_id,
            state: st.state,
            retry_count: st.retry_count,
            last_activity: st.last_activity,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Sets the bearer session key. Clearing it logs out.
    pub fn set_session_key(&self, key: Option<String>) {
        match key.filter(|k| !k.trim().is_empty()) {
            Some(key) => self.inner.lock().session_key = Some(key),
            None => self.logout(),
        }
    }

    /// Opens the connection unless one is already open or opening.
    ///
    /// A no-op without a session key. Cancels any pending reconnect and
    /// restarts the retry budget.
    pub async fn connect(&self) {
        self.open(false).await;
    }

    /// Closes the connection on purpose. No reconnect follows.
    pub fn disconnect(&self) {
        let mut st = self.inner.lock();
        if let Some(timer) = st.visibility_timer.take() {
            timer.cancel();
        }
        self.inner.teardown(&mut st);
        st.retry_count = 0;
        self.inner.set_state(&mut st, ConnectionState::Disconnected);
        info!("Disconnected session {}", self.inner.session_id);
    }

    /// Disconnects and forgets the session key and watched projects.
    pub fn logout(&self) {
        self.disconnect();
        let mut st = self.inner.lock();
        st.session_key = None;
        st.projects.clear();
    }

    /// Hidden tears the connection down; Visible re-establishes it after a
    /// short delay if nothing is open by then. Rapid toggles cancel the
    /// pending re-establish.
    pub fn set_visibility(&self, visibility: Visibility) {
        let mut st = self.inner.lock();
        if let Some(timer) = st.visibility_timer.take() {
            timer.cancel();
        }
        match visibility {
            Visibility::Hidden => {
                self.inner.teardown(&mut st);
                self.inner.set_state(&mut st, ConnectionState::Disconnected);
            }
            Visibility::Visible => {
                let weak = Arc::downgrade(&self.inner);
                st.visibility_timer = Some(TimerHandle::schedule(
                    self.inner.config.visibility_reconnect_delay,
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            ConnectionManager { inner }.on_visible().await;
                        }
                    },
                ));
            }
        }
    }

    /// Watches a project's budget channel. Replayed after every reconnect.
    pub fn subscribe_project(&self, mis: &str) {
        let (added, connected) = {
            let mut st = self.inner.lock();
            (st.projects.insert(mis.to_string()), st.state.is_connected())
        };
        if added && connected {
            self.inner.send(&ClientMessage::Subscribe {
                mis: mis.to_string(),
            });
        }
    }

    pub fn unsubscribe_project(&self, mis: &str) {
        let (removed, connected) = {
            let mut st = self.inner.lock();
            (st.projects.remove(mis), st.state.is_connected())
        };
        if removed && connected {
            self.inner.send(&ClientMessage::Unsubscribe {
                mis: mis.to_string(),
            });
        }
    }

    pub fn watched_projects(&self) -> Vec<String> {
        self.inner.lock().projects.iter().cloned().collect()
    }

    async fn open(&self, from_timer: bool) {
        let session_id = self.inner.session_id;
        let prepared = {
            let mut st = self.inner.lock();
            let Some(key) = st.session_key.clone() else {
                debug!("No session key, not connecting");
                return;
            };
            if st.state == ConnectionState::Connecting
                || (st.state == ConnectionState::Connected
                    && self.inner.registry.is_open(&session_id))
            {
                return;
            }

            self.inner.teardown(&mut st);
            if !from_timer {
                st.retry_count = 0;
            }
            let connection_id = Uuid::new_v4();
            st.connection_id = Some(connection_id);
            self.inner.set_state(&mut st, ConnectionState::Connecting);
            (connection_id, self.inner.config.ws_url(&session_id, &key))
        };

        let (connection_id, url) = prepared;
        let opened = match url {
            Ok(url) => {
                debug!("Opening connection {} to {}", connection_id, url.path());
                let attempt = self
                    .inner
                    .connector
                    .open(&url, self.inner.config.subprotocol.as_deref());
                match tokio::time::timeout(self.inner.config.connect_timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::connection(format!(
                        "timeout after {:?}",
                        self.inner.config.connect_timeout
                    ))),
                }
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(channel) => self.on_open(connection_id, channel),
            Err(e) => {
                warn!("Connection attempt {} failed: {}", connection_id, e);
                self.on_lost(connection_id);
            }
        }
    }

    fn on_open(&self, connection_id: Uuid, channel: DuplexChannel) {
        let DuplexChannel { outbound, inbound } = channel;
        let session_id = self.inner.session_id;
        let projects = {
            let mut st = self.inner.lock();
            if st.connection_id != Some(connection_id) {
                debug!("Discarding superseded connection {}", connection_id);
                let _ = outbound.send(Outbound::Close);
                return;
            }
            st.retry_count = 0;
            st.loss_notified = false;
            st.last_activity = Some(Utc::now());
            self.inner.registry.insert(
                session_id,
                RegisteredConnection {
                    connection_id,
                    outbound,
                    tasks: Vec::new(),
                },
            );
            self.inner.set_state(&mut st, ConnectionState::Connected);
            st.projects.clone()
        };
        info!("Connection {} open for session {}", connection_id, session_id);

        self.inner.send(&ClientMessage::Hello {
            session_id,
            client: CLIENT_NAME.to_string(),
            version: PROTOCOL_VERSION,
        });
        for mis in projects {
            self.inner.send(&ClientMessage::Subscribe { mis });
        }

        let weak = Arc::downgrade(&self.inner);
        let reader = tokio::spawn(read_loop(weak.clone(), connection_id, inbound));
        self.inner
            .registry
            .attach_task(&session_id, connection_id, reader.abort_handle());

        let heartbeat = tokio::spawn(heartbeat_loop(
            weak,
            connection_id,
            self.inner.config.heartbeat_interval,
        ));
        self.inner
            .registry
            .attach_task(&session_id, connection_id, heartbeat.abort_handle());
    }

    fn on_closed(&self, connection_id: Uuid, reason: CloseReason) {
        {
            let mut st = self.inner.lock();
            if st.connection_id != Some(connection_id) {
                debug!("Ignoring close of stale connection {}", connection_id);
                return;
            }
            if let Some(connection) = self
                .inner
                .registry
                .remove_if_current(&self.inner.session_id, connection_id)
            {
                for task in &connection.tasks {
                    task.abort();
                }
            }
            if reason.is_normal() {
                info!("Connection {} closed normally", connection_id);
                st.connection_id = None;
                self.inner.set_state(&mut st, ConnectionState::Disconnected);
                return;
            }
        }
        warn!(
            "Connection {} closed abnormally (code {:?}): {}",
            connection_id, reason.code, reason.reason
        );
        self.on_lost(connection_id);
    }

    /// Schedules the next reconnect, or gives up once retries are exhausted.
    fn on_lost(&self, connection_id: Uuid) {
        let exhausted = {
            let mut st = self.inner.lock();
            if st.connection_id != Some(connection_id) {
                return;
            }
            if st.session_key.is_none() {
                self.inner.set_state(&mut st, ConnectionState::Error);
                return;
            }

            let policy = &self.inner.config.backoff;
            if policy.is_exhausted(st.retry_count) {
                self.inner.set_state(&mut st, ConnectionState::Error);
                if st.loss_notified {
                    None
                } else {
                    st.loss_notified = true;
                    Some(st.retry_count)
                }
            } else {
                let delay = policy.next_delay(st.retry_count);
                st.retry_count += 1;
                self.inner.set_state(&mut st, ConnectionState::Reconnecting);
                debug!(
                    "Reconnect attempt {} in {:?}",
                    st.retry_count, delay
                );
                let weak = Arc::downgrade(&self.inner);
                st.reconnect_timer = Some(TimerHandle::schedule(delay, async move {
                    if let Some(inner) = weak.upgrade() {
                        ConnectionManager { inner }
                            .on_reconnect_timer(connection_id)
                            .await;
                    }
                }));
                None
            }
        };

        if let Some(attempts) = exhausted {
            error!(
                "Server unreachable after {} reconnect attempts, giving up",
                attempts
            );
            self.inner
                .notifier
                .notify(Notification::connection_lost(attempts));
        }
    }

    async fn on_reconnect_timer(&self, connection_id: Uuid) {
        {
            let mut st = self.inner.lock();
            if st.connection_id != Some(connection_id)
                || st.state != ConnectionState::Reconnecting
            {
                debug!("Ignoring stale reconnect timer for {}", connection_id);
                return;
            }
            // This callback is the timer; release the slot without aborting it.
            st.reconnect_timer = None;
        }
        self.open(true).await;
    }

    async fn on_visible(&self) {
        {
            let mut st = self.inner.lock();
            st.visibility_timer = None;
            if st.state == ConnectionState::Connecting
                || self.inner.registry.is_open(&self.inner.session_id)
            {
                return;
            }
        }
        self.connect().await;
    }
}

async fn read_loop(
    weak: Weak<ManagerInner>,
    connection_id: Uuid,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    let reason = loop {
        match inbound.recv().await {
            Some(Inbound::Text(text)) => {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                inner.touch(connection_id);
                inner.dispatcher.dispatch(&text);
            }
            Some(Inbound::Closed(reason)) => break reason,
            None => break CloseReason::abnormal("channel dropped"),
        }
    };
    if let Some(inner) = weak.upgrade() {
        ConnectionManager { inner }.on_closed(connection_id, reason);
    }
}

async fn heartbeat_loop(weak: Weak<ManagerInner>, connection_id: Uuid, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.current_connection() != Some(connection_id) || !inner.send(&ClientMessage::Ping)
        {
            return;
        }
    }
}
