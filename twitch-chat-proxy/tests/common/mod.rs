//! In-memory transport that records every call made against it.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use twitch_chat_proxy::{
    ChatMessage, ChatProxy, ChatTransport, Credentials, Error, ProxyConfig, RaidNotification, Result,
    TransportEvent,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { username: String, token: String },
    Reconnect { username: String, token: String },
    Disconnect,
    Join(String),
    Leave(String),
    Send { channel: String, text: String },
}

impl Call {
    pub fn is_connect(&self) -> bool {
        matches!(self, Call::Connect { .. } | Call::Reconnect { .. })
    }
}

/// What the spy reports after a connect or reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// `Connected` / `Reconnected`.
    Accepted,
    /// Nothing at all.
    Silent,
    IncorrectLogin,
    ConnectionError,
}

pub struct SpyTransport {
    calls: Mutex<Vec<Call>>,
    events: broadcast::Sender<TransportEvent>,
    connected: AtomicBool,
    joined: Mutex<BTreeSet<String>>,
    /// Joins are confirmed immediately unless cleared.
    auto_join: AtomicBool,
    fail_joins: AtomicBool,
    login: Mutex<LoginOutcome>,
    connect_delay: Mutex<Duration>,
}

impl Default for SpyTransport {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            calls: Mutex::new(Vec::new()),
            events,
            connected: AtomicBool::new(false),
            joined: Mutex::new(BTreeSet::new()),
            auto_join: AtomicBool::new(true),
            fail_joins: AtomicBool::new(false),
            login: Mutex::new(LoginOutcome::Accepted),
            connect_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl SpyTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_fail_joins(&self, fail: bool) {
        self.fail_joins.store(fail, Ordering::SeqCst);
    }

    pub fn set_auto_join(&self, auto: bool) {
        self.auto_join.store(auto, Ordering::SeqCst);
    }

    pub fn set_login_outcome(&self, outcome: LoginOutcome) {
        *self.login.lock() = outcome;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn joined_channels_contains(&self, channel: &str) -> bool {
        self.joined.lock().contains(channel)
    }

    /// Pretend the server dropped us out of a channel.
    pub fn forget_channel(&self, channel: &str) {
        self.joined.lock().remove(channel);
    }

    /// Pretend the socket died.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.joined.lock().clear();
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    async fn login(&self, signal: TransportEvent) {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = *self.login.lock();
        match outcome {
            LoginOutcome::Accepted => {
                self.connected.store(true, Ordering::SeqCst);
                self.emit(signal);
            }
            LoginOutcome::Silent => {}
            LoginOutcome::IncorrectLogin => self.emit(TransportEvent::IncorrectLogin {
                message: "Login authentication failed".to_string(),
            }),
            LoginOutcome::ConnectionError => self.emit(TransportEvent::ConnectionError {
                message: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ChatTransport for SpyTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        self.record(Call::Connect {
            username: credentials.username.clone(),
            token: credentials.oauth_token.expose_secret().clone(),
        });
        self.login(TransportEvent::Connected).await;
        Ok(())
    }

    async fn reconnect(&self, credentials: &Credentials) -> Result<()> {
        self.record(Call::Reconnect {
            username: credentials.username.clone(),
            token: credentials.oauth_token.expose_secret().clone(),
        });
        self.joined.lock().clear();
        self.login(TransportEvent::Reconnected).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Call::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        self.joined.lock().clear();
        self.emit(TransportEvent::Disconnected {
            reason: "requested".to_string(),
        });
        Ok(())
    }

    async fn join_channel(&self, channel: &str) -> Result<()> {
        self.record(Call::Join(channel.to_string()));
        if self.fail_joins.load(Ordering::SeqCst) {
            return Err(Error::transport("join refused"));
        }
        if self.auto_join.load(Ordering::SeqCst) {
            self.joined.lock().insert(channel.to_string());
        }
        Ok(())
    }

    async fn leave_channel(&self, channel: &str) -> Result<()> {
        self.record(Call::Leave(channel.to_string()));
        self.joined.lock().remove(channel);
        Ok(())
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<()> {
        self.record(Call::Send {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    fn joined_channels(&self) -> Vec<String> {
        self.joined.lock().iter().cloned().collect()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

/// Config with an idle supervisor, so tests drive passes themselves.
pub fn quiet_config() -> ProxyConfig {
    ProxyConfig {
        reconnect_interval_ms: 3_600_000,
        connect_timeout_ms: 2_000,
        ..ProxyConfig::default()
    }
}

pub fn spy_proxy(config: ProxyConfig) -> (Arc<ChatProxy>, Arc<SpyTransport>) {
    spy_proxy_with(config, Credentials::new("bot", "token-1"))
}

pub fn spy_proxy_with(config: ProxyConfig, credentials: Credentials) -> (Arc<ChatProxy>, Arc<SpyTransport>) {
    let spy = Arc::new(SpyTransport::default());
    let shared = Arc::clone(&spy);
    let factory = move || Arc::clone(&shared) as Arc<dyn ChatTransport>;
    (ChatProxy::with_credentials(config, factory, credentials), spy)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn message(channel: &str, text: &str) -> ChatMessage {
    ChatMessage {
        channel: channel.to_string(),
        user_id: Some("1001".to_string()),
        username: "viewer".to_string(),
        display_name: "Viewer".to_string(),
        text: text.to_string(),
        message_id: None,
        is_moderator: false,
        is_subscriber: false,
        is_broadcaster: false,
        sent_at: None,
        tags: Default::default(),
    }
}

pub fn raid(channel: &str) -> RaidNotification {
    RaidNotification {
        channel: channel.to_string(),
        raider_login: "raider".to_string(),
        raider_display_name: "Raider".to_string(),
        viewer_count: 25,
    }
}
