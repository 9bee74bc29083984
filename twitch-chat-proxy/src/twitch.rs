//! [`ChatTransport`] backed by a live Twitch IRC-over-WebSocket connection.
//!
//! Each connect opens a fresh `twitch_chat_sdk` client and spawns a pump
//! task that turns its events into [`TransportEvent`]s on a broadcast
//! channel. The pump also tracks the connected flag and the channels the
//! server has confirmed we joined.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use twitch_chat_sdk::client::{self, ClientHandle, ConnectConfig};
use twitch_chat_sdk::event::Event;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::registry::normalize_channel;
use crate::transport::{ChatTransport, Credentials, TransportEvent};

/// How long a disconnect waits for the old connection to wind down.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

pub struct TwitchTransport {
    server_url: String,
    throttle_limit: usize,
    throttle_period: Duration,
    events: broadcast::Sender<TransportEvent>,
    state: Arc<LinkState>,
    handle: Mutex<Option<ClientHandle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl TwitchTransport {
    pub fn new(config: &ProxyConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(16));
        Self {
            server_url: config.server_url.clone(),
            throttle_limit: config.throttle_limit,
            throttle_period: config.throttle_period(),
            events,
            state: Arc::new(LinkState::default()),
            handle: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// A factory that builds a `TwitchTransport` from `config`.
    pub fn factory(config: ProxyConfig) -> impl Fn() -> Arc<dyn ChatTransport> + Send + Sync + 'static {
        move || Arc::new(TwitchTransport::new(&config)) as Arc<dyn ChatTransport>
    }

    fn current_handle(&self) -> Result<ClientHandle> {
        match self.handle.lock().as_ref() {
            Some(handle) if !handle.is_closed() => Ok(handle.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    async fn open(&self, credentials: &Credentials, signal: TransportEvent) -> Result<()> {
        self.close().await;

        let config = ConnectConfig {
            server_url: self.server_url.clone(),
            username: credentials.username.clone(),
            oauth_token: credentials.oauth_token.expose_secret().clone(),
            throttle_limit: self.throttle_limit,
            throttle_period: self.throttle_period,
        };

        let (handle, rx) = match client::connect(config).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(url = %self.server_url, error = %e, "Chat connection failed");
                let _ = self.events.send(TransportEvent::ConnectionError {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        *self.state.nick.lock() = credentials.username.to_lowercase();
        *self.handle.lock() = Some(handle);
        let pump = tokio::spawn(pump_events(
            rx,
            Arc::clone(&self.state),
            self.events.clone(),
            signal,
        ));
        *self.pump.lock() = Some(pump);
        Ok(())
    }

    /// Quit the current connection and wait for its pump to report the
    /// disconnect.
    async fn close(&self) {
        let handle = self.handle.lock().take();
        let pump = self.pump.lock().take();

        if let Some(handle) = handle {
            let _ = handle.quit().await;
        }
        if let Some(mut pump) = pump {
            if tokio::time::timeout(CLOSE_GRACE, &mut pump).await.is_err() {
                tracing::warn!("Chat connection did not close in time, abandoning it");
                pump.abort();
            }
        }
        self.state.reset();
    }
}

impl Drop for TwitchTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl ChatTransport for TwitchTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        self.open(credentials, TransportEvent::Connected).await
    }

    async fn reconnect(&self, credentials: &Credentials) -> Result<()> {
        self.open(credentials, TransportEvent::Reconnected).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.close().await;
        Ok(())
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        self.current_handle()?.join(channel).await?;
        Ok(())
    }

    async fn leave_channel(&self, channel: &str) -> Result<()> {
        self.current_handle()?.part(channel).await?;
        Ok(())
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<()> {
        self.current_handle()?.privmsg(channel, text).await?;
        Ok(())
    }

    fn joined_channels(&self) -> Vec<String> {
        self.state.channels.lock().iter().cloned().collect()
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Connection state the pump maintains.
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    nick: Mutex<String>,
    channels: Mutex<BTreeSet<String>>,
}

impl LinkState {
    fn reset(&self) {
        self.connected.store(false, Ordering::Release);
        self.channels.lock().clear();
    }

    fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nick.lock())
    }

    /// Fold one client event into the state and translate it.
    fn apply(&self, event: Event, signal: &TransportEvent) -> Option<TransportEvent> {
        match event {
            Event::Connected { nick } => {
                *self.nick.lock() = nick.to_lowercase();
                self.connected.store(true, Ordering::Release);
                tracing::info!(%nick, "Logged in to chat");
                Some(signal.clone())
            }
            Event::Joined { channel, nick } => {
                if self.is_self(&nick) {
                    tracing::info!(%channel, "Joined channel");
                    self.channels.lock().insert(normalize_channel(&channel));
                }
                None
            }
            Event::Parted { channel, nick } => {
                if self.is_self(&nick) {
                    tracing::info!(%channel, "Left channel");
                    self.channels.lock().remove(&normalize_channel(&channel));
                }
                None
            }
            Event::Message(message) => Some(TransportEvent::MessageReceived(message)),
            Event::UserBanned(ban) => Some(TransportEvent::UserBanned(ban)),
            Event::Raid(raid) => Some(TransportEvent::RaidNotification(raid)),
            Event::UserTimedOut(timeout) => {
                tracing::debug!(
                    channel = %timeout.channel,
                    user = %timeout.username,
                    duration_secs = timeout.duration_secs,
                    "User timed out"
                );
                None
            }
            Event::Notice { channel, msg_id, text } => {
                tracing::debug!(?channel, ?msg_id, %text, "Server notice");
                None
            }
            Event::IncorrectLogin { reason } => Some(TransportEvent::IncorrectLogin { message: reason }),
            Event::NoPermission { channel, text } => {
                tracing::warn!(?channel, %text, "No permission");
                Some(TransportEvent::NoPermission { channel })
            }
            Event::ReconnectRequested => {
                tracing::info!("Server requested a reconnect");
                None
            }
            Event::Error { message } => Some(TransportEvent::Error { message }),
            Event::Disconnected { reason } => {
                self.reset();
                Some(TransportEvent::Disconnected { reason })
            }
            Event::RawLine(line) => {
                tracing::trace!(%line, "<<");
                None
            }
        }
    }
}

async fn pump_events(
    mut rx: mpsc::Receiver<Event>,
    state: Arc<LinkState>,
    events: broadcast::Sender<TransportEvent>,
    signal: TransportEvent,
) {
    while let Some(event) = rx.recv().await {
        if let Some(out) = state.apply(event, &signal) {
            // No receivers is fine; nobody is listening yet.
            let _ = events.send(out);
        }
    }
    state.connected.store(false, Ordering::Release);
}
