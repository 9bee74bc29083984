//! Errors surfaced by the chat client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection task has exited; the handle is dead.
    #[error("connection closed")]
    Closed,

    #[error("protocol: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
