//! Versioned JSON line written to stdout for every relayed event.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use twitch_chat_proxy::{ChatMessage, RaidNotification, UserBan};

/// Relayed event, tagged so consumers can switch on `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    Message(ChatMessage),
    Ban(UserBan),
    Raid(RaidNotification),
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub version: u32,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub event: RelayEvent,
}

/// Numbers envelopes in the order they are written.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    pub fn wrap(&self, event: RelayEvent) -> EventEnvelope {
        EventEnvelope {
            version: 1,
            seq: self.next.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }

    /// Serialize and print one line. Serialization failures are logged.
    pub fn emit(&self, event: RelayEvent) {
        match serde_json::to_string(&self.wrap(event)) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode event"),
        }
    }
}
