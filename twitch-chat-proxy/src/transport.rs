//! The chat transport seam.
//!
//! [`crate::ChatProxy`] never talks to the network directly. It drives a
//! [`ChatTransport`], built lazily by a [`TransportFactory`] on the first
//! connect, and consumes the transport's [`TransportEvent`] broadcast.
//! [`crate::twitch::TwitchTransport`] is the production implementation;
//! tests substitute an in-memory one.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use twitch_chat_sdk::event::{ChatMessage, RaidNotification, UserBan};

use crate::error::Result;

/// Login for the chat account.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub oauth_token: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, oauth_token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            oauth_token: SecretString::new(oauth_token.into()),
        }
    }

    /// Both fields present and non-blank.
    pub fn is_usable(&self) -> bool {
        !self.username.trim().is_empty() && !self.oauth_token.expose_secret().trim().is_empty()
    }

    pub(crate) fn same_token(&self, token: &str) -> bool {
        self.oauth_token.expose_secret() == token
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("oauth_token", &"<redacted>")
            .finish()
    }
}

/// Everything a transport reports. Channel names are normalized.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    MessageReceived(ChatMessage),
    UserBanned(UserBan),
    RaidNotification(RaidNotification),
    /// First login after `connect`.
    Connected,
    /// First login after `reconnect`.
    Reconnected,
    Disconnected { reason: String },
    /// The connection could not be established.
    ConnectionError { message: String },
    Error { message: String },
    IncorrectLogin { message: String },
    NoPermission { channel: Option<String> },
}

impl TransportEvent {
    /// True for the signals `connect` waits on.
    pub fn is_connect_signal(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }
}

/// A chat connection the proxy can drive.
///
/// All methods are called with the proxy's connection lock held, so
/// implementations see them serialized. Events must be delivered through
/// [`ChatTransport::subscribe`] from the moment the transport exists; the
/// proxy subscribes once for dispatch and briefly during each connect.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Open the first connection.
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// Drop whatever is left of the previous connection and open a new one.
    async fn reconnect(&self, credentials: &Credentials) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Issue a join. Completion is reported later via `joined_channels`.
    async fn join_channel(&self, channel: &str) -> Result<()>;

    async fn leave_channel(&self, channel: &str) -> Result<()>;

    async fn send_message(&self, channel: &str, text: &str) -> Result<()>;

    /// Channels the server has confirmed we are in, normalized.
    fn joined_channels(&self) -> Vec<String>;

    fn is_connected(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Builds the transport on the proxy's first connect.
pub trait TransportFactory: Send + Sync + 'static {
    fn create(&self) -> Arc<dyn ChatTransport>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Arc<dyn ChatTransport> + Send + Sync + 'static,
{
    fn create(&self) -> Arc<dyn ChatTransport> {
        self()
    }
}
