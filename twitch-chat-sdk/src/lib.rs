//! twitch-chat-sdk: Twitch chat over IRC-over-WebSocket.
//!
//! [`client::connect`] opens a socket, logs in and spawns the connection
//! task. Commands go out through a [`client::ClientHandle`]; everything the
//! server says comes back as [`event::Event`]s on an mpsc receiver.

pub mod client;
pub mod error;
pub mod event;
pub mod irc;
pub mod throttle;

pub use error::{Error, Result};
