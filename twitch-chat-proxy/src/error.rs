//! Errors raised at the transport seam.
//!
//! None of these cross the public [`crate::ChatProxy`] surface: the proxy
//! logs them and reports plain `false`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No live connection to issue the command on.
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Sdk(#[from] twitch_chat_sdk::Error),

    #[error("{0}")]
    Transport(String),
}

impl Error {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
