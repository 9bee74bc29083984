//! The process-wide chat connection.
//!
//! One transport, one connection lock. Everything that touches the
//! connection (connect, reconnect, join, send, credential changes) runs
//! under `connection`; inbound events are dispatched by a separate task
//! that only ever touches the [`ChannelRegistry`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use twitch_chat_sdk::event::{ChatMessage, RaidNotification, UserBan};

use crate::callback::{Callback, SubscriptionId};
use crate::config::ProxyConfig;
use crate::registry::{ChannelRegistry, Disconnect, normalize_channel};
use crate::supervisor;
use crate::transport::{ChatTransport, Credentials, TransportEvent, TransportFactory};

/// State guarded by the connection lock.
#[derive(Default)]
struct Connection {
    credentials: Credentials,
    transport: Option<Arc<dyn ChatTransport>>,
    /// Event dispatch task, started once with the transport.
    dispatcher: Option<JoinHandle<()>>,
    /// Whether a connect has been issued before; later attempts reconnect.
    attempted: bool,
}

pub struct ChatProxy {
    config: ProxyConfig,
    factory: Box<dyn TransportFactory>,
    registry: Arc<ChannelRegistry>,
    connection: tokio::sync::Mutex<Connection>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChatProxy {
    /// Create the service without credentials and start its supervisor.
    /// Must be called inside a tokio runtime.
    pub fn start(config: ProxyConfig, factory: impl TransportFactory) -> Arc<Self> {
        Self::with_credentials(config, factory, Credentials::default())
    }

    pub fn with_credentials(
        config: ProxyConfig,
        factory: impl TransportFactory,
        credentials: Credentials,
    ) -> Arc<Self> {
        let interval = config.reconnect_interval();
        let proxy = Arc::new(Self {
            config,
            factory: Box::new(factory),
            registry: Arc::new(ChannelRegistry::new()),
            connection: tokio::sync::Mutex::new(Connection {
                credentials,
                ..Connection::default()
            }),
            supervisor: parking_lot::Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let handle = supervisor::spawn(Arc::downgrade(&proxy), interval);
        *proxy.supervisor.lock() = Some(handle);
        tracing::debug!(interval_ms = interval.as_millis() as u64, "Chat proxy started");
        proxy
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Snapshot of the channels we intend to stay joined to.
    pub fn desired_channels(&self) -> Vec<String> {
        self.registry.desired_channels()
    }

    /// Whether a transport exists and reports a live connection.
    pub async fn is_connected(&self) -> bool {
        let conn = self.connection.lock().await;
        conn.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    // ── Connection ──

    /// Replace the credentials. A changed token drops the current
    /// connection and, when the new token is non-blank, connects again.
    pub async fn set_credentials(&self, username: &str, oauth_token: &str) {
        let reconnect = {
            let mut conn = self.connection.lock().await;
            let token_changed = !conn.credentials.same_token(oauth_token);
            conn.credentials = Credentials::new(username, oauth_token);
            if !token_changed {
                return;
            }
            match conn.transport.clone() {
                Some(transport) => {
                    tracing::info!(%username, "Chat token changed, dropping connection");
                    if let Err(e) = transport.disconnect().await {
                        tracing::warn!(error = %e, "Disconnect failed");
                    }
                    !oauth_token.trim().is_empty()
                }
                None => false,
            }
        };
        if reconnect {
            self.connect().await;
        }
    }

    /// Make sure the connection is up. Idempotent; returns false on blank
    /// credentials, transport failure or timeout.
    pub async fn connect(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut conn = self.connection.lock().await;

        if conn.transport.as_ref().is_some_and(|t| t.is_connected()) {
            return true;
        }
        if !conn.credentials.is_usable() {
            tracing::debug!("No chat credentials, not connecting");
            return false;
        }

        let transport = match conn.transport.clone() {
            Some(transport) => transport,
            None => {
                let transport = self.factory.create();
                let events = transport.subscribe();
                conn.dispatcher = Some(tokio::spawn(dispatch_events(events, Arc::clone(&self.registry))));
                conn.transport = Some(Arc::clone(&transport));
                transport
            }
        };

        // Subscribe before issuing the connect so the signal cannot slip past.
        let mut signals = transport.subscribe();
        let first = !conn.attempted;
        conn.attempted = true;
        let username = conn.credentials.username.clone();
        tracing::info!(%username, reconnect = !first, "Connecting to chat");

        let issued = if first {
            transport.connect(&conn.credentials).await
        } else {
            transport.reconnect(&conn.credentials).await
        };
        if let Err(e) = issued {
            tracing::warn!(%username, error = %e, "Chat connect failed");
            return false;
        }

        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, wait_for_login(&mut signals)).await {
            Ok(true) => transport.is_connected(),
            Ok(false) => false,
            Err(_) => {
                tracing::warn!(%username, timeout_ms = timeout.as_millis() as u64, "Timed out waiting for chat login");
                false
            }
        }
    }

    /// Add the channel to the desired set, connect and issue a join unless
    /// the transport already reports it joined. Join completion is not
    /// awaited.
    pub async fn join_channel(&self, channel: &str) -> bool {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return false;
        }
        self.registry.desire(&channel);
        if !self.connect().await {
            return false;
        }

        let conn = self.connection.lock().await;
        let Some(transport) = conn.transport.as_ref() else {
            return false;
        };
        if transport.joined_channels().iter().any(|c| c.eq_ignore_ascii_case(&channel)) {
            return true;
        }
        match transport.join_channel(&channel).await {
            Ok(()) => {
                tracing::debug!(%channel, "Join issued");
                true
            }
            Err(e) => {
                tracing::warn!(%channel, error = %e, "Join failed");
                false
            }
        }
    }

    /// Leave a channel on the live connection. The desired set is not
    /// changed, so the supervisor will rejoin it on its next pass.
    pub async fn leave_channel(&self, channel: &str) -> bool {
        let channel = normalize_channel(channel);
        let conn = self.connection.lock().await;
        let Some(transport) = conn.transport.as_ref().filter(|t| t.is_connected()) else {
            return false;
        };
        match transport.leave_channel(&channel).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%channel, error = %e, "Leave failed");
                false
            }
        }
    }

    /// [`Self::send_message_with_retries`] with the configured retry count.
    pub async fn send_message(&self, channel: &str, text: &str) -> bool {
        self.send_message_with_retries(channel, text, self.config.send_retry_attempts)
            .await
    }

    /// Join (up to `attempts` tries), then send if the connection is live
    /// and the transport reports the channel joined.
    pub async fn send_message_with_retries(&self, channel: &str, text: &str, attempts: u32) -> bool {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return false;
        }

        let mut joined = false;
        for attempt in 1..=attempts.max(1) {
            if self.join_channel(&channel).await {
                joined = true;
                break;
            }
            tracing::debug!(%channel, attempt, "Join attempt failed");
        }
        if !joined {
            tracing::warn!(%channel, "Giving up on send, channel could not be joined");
            return false;
        }

        let conn = self.connection.lock().await;
        let Some(transport) = conn.transport.as_ref().filter(|t| t.is_connected()) else {
            return false;
        };
        if !transport.joined_channels().iter().any(|c| c.eq_ignore_ascii_case(&channel)) {
            tracing::debug!(%channel, "Channel not joined yet, send skipped");
            return false;
        }
        tracing::info!(%channel, %text, "Sending chat message");
        match transport.send_message(&channel, text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%channel, error = %e, "Send failed");
                false
            }
        }
    }

    // ── Subscriptions ──

    /// Join the channel (failure tolerated) and subscribe to its chat.
    pub async fn add_message_callback(&self, channel: &str, cb: Callback<ChatMessage>) -> SubscriptionId {
        self.join_channel(channel).await;
        self.registry.messages().add(channel, cb)
    }

    pub fn remove_message_callback(&self, channel: &str, id: SubscriptionId) -> bool {
        self.registry.messages().remove(channel, id)
    }

    pub async fn add_banned_callback(&self, channel: &str, cb: Callback<UserBan>) -> SubscriptionId {
        self.join_channel(channel).await;
        self.registry.bans().add(channel, cb)
    }

    pub fn remove_banned_callback(&self, channel: &str, id: SubscriptionId) -> bool {
        self.registry.bans().remove(channel, id)
    }

    pub async fn add_raid_callback(&self, channel: &str, cb: Callback<RaidNotification>) -> SubscriptionId {
        self.join_channel(channel).await;
        self.registry.raids().add(channel, cb)
    }

    pub fn remove_raid_callback(&self, channel: &str, id: SubscriptionId) -> bool {
        self.registry.raids().remove(channel, id)
    }

    pub fn add_disconnected_callback(&self, cb: Callback<Disconnect>) -> SubscriptionId {
        self.registry.add_disconnected(cb)
    }

    pub fn remove_disconnected_callback(&self, id: SubscriptionId) -> bool {
        self.registry.remove_disconnected(id)
    }

    // ── Lifecycle ──

    /// Run one supervisor pass now.
    pub async fn supervise_once(&self) {
        supervisor::tick(self).await;
    }

    /// Stop the supervisor and event dispatch, then drop the connection.
    /// Later connects return false.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }

        let mut conn = self.connection.lock().await;
        if let Some(dispatcher) = conn.dispatcher.take() {
            dispatcher.abort();
        }
        if let Some(transport) = conn.transport.take() {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(error = %e, "Disconnect during shutdown failed");
            }
        }
        tracing::info!("Chat proxy shut down");
    }
}

impl Drop for ChatProxy {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
        if let Some(dispatcher) = self.connection.get_mut().dispatcher.take() {
            dispatcher.abort();
        }
    }
}

/// Wait for the transport to confirm a login. False on a login failure or
/// a closed event stream.
async fn wait_for_login(signals: &mut broadcast::Receiver<TransportEvent>) -> bool {
    loop {
        match signals.recv().await {
            Ok(event) if event.is_connect_signal() => return true,
            Ok(TransportEvent::IncorrectLogin { .. } | TransportEvent::ConnectionError { .. }) => return false,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return false,
        }
    }
}

/// Deliver transport events to subscribers until the transport goes away.
async fn dispatch_events(mut events: broadcast::Receiver<TransportEvent>, registry: Arc<ChannelRegistry>) {
    loop {
        match events.recv().await {
            Ok(event) => dispatch(&registry, event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event dispatch fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("Event dispatch stopped");
}

fn dispatch(registry: &ChannelRegistry, event: TransportEvent) {
    match event {
        TransportEvent::MessageReceived(message) => {
            registry.dispatch_message(&message);
        }
        TransportEvent::UserBanned(ban) => {
            registry.dispatch_ban(&ban);
        }
        TransportEvent::RaidNotification(raid) => {
            tracing::info!(channel = %raid.channel, raider = %raid.raider_login, viewers = raid.viewer_count, "Raid");
            registry.dispatch_raid(&raid);
        }
        TransportEvent::Connected => tracing::info!("Chat connected"),
        TransportEvent::Reconnected => tracing::info!("Chat reconnected"),
        TransportEvent::Disconnected { reason } => {
            tracing::warn!(%reason, "Chat disconnected");
            registry.dispatch_disconnected(&reason);
        }
        TransportEvent::ConnectionError { message } => {
            tracing::error!(%message, "Chat connection error");
        }
        TransportEvent::Error { message } => tracing::error!(%message, "Chat error"),
        TransportEvent::IncorrectLogin { message } => {
            tracing::error!(%message, "Chat login rejected");
        }
        TransportEvent::NoPermission { channel } => {
            tracing::warn!(?channel, "No permission in channel");
        }
    }
}
