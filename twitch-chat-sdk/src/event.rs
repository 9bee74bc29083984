//! Events emitted by the chat client for the consumer to act on.
//!
//! Channel names are always reported lowercased and without the `#` sigil.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A chat message posted in a channel (PRIVMSG).
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub channel: String,
    pub user_id: Option<String>,
    /// Login name of the sender.
    pub username: String,
    pub display_name: String,
    pub text: String,
    /// Value of the `id` tag, used for deletes and replies.
    pub message_id: Option<String>,
    pub is_moderator: bool,
    pub is_subscriber: bool,
    pub is_broadcaster: bool,
    /// `tmi-sent-ts`, when present.
    pub sent_at: Option<DateTime<Utc>>,
    /// All IRCv3 tags as received.
    pub tags: HashMap<String, String>,
}

/// A user permanently banned from a channel (CLEARCHAT without duration).
#[derive(Debug, Clone, Serialize)]
pub struct UserBan {
    pub channel: String,
    pub username: String,
    pub target_user_id: Option<String>,
    pub reason: Option<String>,
}

/// A user timed out in a channel (CLEARCHAT with `ban-duration`).
#[derive(Debug, Clone, Serialize)]
pub struct UserTimeout {
    pub channel: String,
    pub username: String,
    pub duration_secs: u64,
}

/// Another broadcaster raided the channel (USERNOTICE `msg-id=raid`).
#[derive(Debug, Clone, Serialize)]
pub struct RaidNotification {
    pub channel: String,
    pub raider_login: String,
    pub raider_display_name: String,
    pub viewer_count: u64,
}

/// Events that the client emits to the consumer.
#[derive(Debug, Clone)]
pub enum Event {
    /// Login accepted (RPL_WELCOME). `nick` is our confirmed login.
    Connected { nick: String },

    /// Someone (possibly us) joined a channel.
    Joined { channel: String, nick: String },

    /// Someone (possibly us) left a channel.
    Parted { channel: String, nick: String },

    Message(ChatMessage),

    UserBanned(UserBan),

    UserTimedOut(UserTimeout),

    Raid(RaidNotification),

    /// Server NOTICE not covered by a more specific event.
    Notice {
        channel: Option<String>,
        msg_id: Option<String>,
        text: String,
    },

    /// The server rejected our credentials.
    IncorrectLogin { reason: String },

    /// We lack permission for something we tried in a channel.
    NoPermission { channel: Option<String>, text: String },

    /// The server asked us to reconnect; the connection is about to close.
    ReconnectRequested,

    /// The connection failed (socket error, ping timeout). Followed by
    /// `Disconnected`.
    Error { message: String },

    /// Connection was closed. Emitted once per connection.
    Disconnected { reason: String },

    /// Raw server line (for debugging).
    RawLine(String),
}
