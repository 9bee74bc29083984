//! Runtime settings for the chat proxy.

use std::time::Duration;

use serde::Deserialize;
use twitch_chat_sdk::client::TWITCH_CHAT_URL;
use twitch_chat_sdk::throttle;

/// How long `connect` waits for the server to accept the login.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause between reconnect supervisor passes.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
/// Join attempts `send_message` makes before giving up.
pub const DEFAULT_SEND_RETRY_ATTEMPTS: u32 = 5;

/// Settings for [`crate::ChatProxy`] and the transport it builds.
///
/// Durations are given in milliseconds so the struct can be filled from
/// environment variables or a JSON/TOML document without custom parsing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// WebSocket URL of the chat server.
    pub server_url: String,
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub send_retry_attempts: u32,
    /// Chat messages allowed per `throttle_period_ms`.
    pub throttle_limit: usize,
    pub throttle_period_ms: u64,
    /// Capacity of the transport's event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_url: TWITCH_CHAT_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL.as_millis() as u64,
            send_retry_attempts: DEFAULT_SEND_RETRY_ATTEMPTS,
            throttle_limit: throttle::DEFAULT_LIMIT,
            throttle_period_ms: throttle::DEFAULT_PERIOD.as_millis() as u64,
            event_capacity: 1024,
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn throttle_period(&self) -> Duration {
        Duration::from_millis(self.throttle_period_ms)
    }
}
