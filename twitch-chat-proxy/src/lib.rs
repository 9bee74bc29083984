//! twitch-chat-proxy: one persistent, self-healing Twitch chat connection
//! shared by the whole process.
//!
//! [`ChatProxy`] owns the connection and serializes every operation on it.
//! Callers subscribe to per-channel message, ban and raid events; each
//! subscription also marks the channel as desired, and the reconnect
//! supervisor keeps the connection up and every desired channel joined.
//!
//! The network side sits behind [`ChatTransport`]. [`TwitchTransport`] is
//! the real one; tests plug in their own.

pub mod callback;
pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
mod supervisor;
pub mod transport;
pub mod twitch;

pub use callback::{Callback, SubscriptionId, callback};
pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use proxy::ChatProxy;
pub use registry::{ChannelRegistry, Disconnect, normalize_channel};
pub use transport::{ChatTransport, Credentials, TransportEvent, TransportFactory};
pub use twitch::TwitchTransport;
pub use twitch_chat_sdk::event::{ChatMessage, RaidNotification, UserBan};
