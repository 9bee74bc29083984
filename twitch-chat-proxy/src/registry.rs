//! Channel subscription registry.
//!
//! Holds the desired channel set (channels the process should stay joined
//! to) and the per-channel callback lists for messages, bans and raids, plus
//! the un-keyed disconnect list. Pure in-memory state; the proxy does the
//! joining.
//!
//! Every collection has its own lock and no two are ever held together.
//! Dispatch copies the subscriber list out of the lock and invokes it
//! afterwards, so a callback added or removed during a dispatch may or may
//! not see that particular event.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use twitch_chat_sdk::event::{ChatMessage, RaidNotification, UserBan};

use crate::callback::{Callback, SubscriptionId, Subscribers, invoke_all};

/// Canonical channel key: trimmed, no `#`, lowercase.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Payload handed to disconnect subscribers.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub reason: String,
}

/// Callback lists for one event kind, keyed by normalized channel.
pub struct ChannelCallbacks<T> {
    kind: &'static str,
    by_channel: Mutex<HashMap<String, Subscribers<T>>>,
}

impl<T> ChannelCallbacks<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            by_channel: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, channel: &str, cb: Callback<T>) -> SubscriptionId {
        self.by_channel
            .lock()
            .entry(normalize_channel(channel))
            .or_default()
            .add(cb)
    }

    /// Empty lists are dropped; the desired channel set is not touched.
    pub fn remove(&self, channel: &str, id: SubscriptionId) -> bool {
        let key = normalize_channel(channel);
        let mut map = self.by_channel.lock();
        let Some(subs) = map.get_mut(&key) else {
            return false;
        };
        let removed = subs.remove(id);
        if subs.is_empty() {
            map.remove(&key);
        }
        removed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.by_channel
            .lock()
            .get(&normalize_channel(channel))
            .map_or(0, Subscribers::len)
    }

    /// Invoke the channel's subscribers. Returns how many were invoked.
    pub fn dispatch(&self, channel: &str, arg: &T) -> usize {
        let key = normalize_channel(channel);
        let callbacks = match self.by_channel.lock().get(&key) {
            Some(subs) => subs.snapshot(),
            None => return 0,
        };
        invoke_all(&callbacks, arg, self.kind, &key);
        callbacks.len()
    }
}

/// Desired channels plus every subscriber list.
pub struct ChannelRegistry {
    desired: Mutex<BTreeSet<String>>,
    messages: ChannelCallbacks<ChatMessage>,
    bans: ChannelCallbacks<UserBan>,
    raids: ChannelCallbacks<RaidNotification>,
    disconnected: Mutex<Subscribers<Disconnect>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self {
            desired: Mutex::new(BTreeSet::new()),
            messages: ChannelCallbacks::new("message"),
            bans: ChannelCallbacks::new("ban"),
            raids: ChannelCallbacks::new("raid"),
            disconnected: Mutex::new(Subscribers::default()),
        }
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Desired channel set ──

    /// Record a channel we should be joined to. Returns true if it was new.
    pub fn desire(&self, channel: &str) -> bool {
        let key = normalize_channel(channel);
        if key.is_empty() {
            return false;
        }
        self.desired.lock().insert(key)
    }

    pub fn is_desired(&self, channel: &str) -> bool {
        self.desired.lock().contains(&normalize_channel(channel))
    }

    /// Snapshot of the desired channels, sorted.
    pub fn desired_channels(&self) -> Vec<String> {
        self.desired.lock().iter().cloned().collect()
    }

    // ── Per-channel callbacks ──

    pub fn messages(&self) -> &ChannelCallbacks<ChatMessage> {
        &self.messages
    }

    pub fn bans(&self) -> &ChannelCallbacks<UserBan> {
        &self.bans
    }

    pub fn raids(&self) -> &ChannelCallbacks<RaidNotification> {
        &self.raids
    }

    // ── Disconnect callbacks ──

    pub fn add_disconnected(&self, cb: Callback<Disconnect>) -> SubscriptionId {
        self.disconnected.lock().add(cb)
    }

    pub fn remove_disconnected(&self, id: SubscriptionId) -> bool {
        self.disconnected.lock().remove(id)
    }

    // ── Dispatch ──

    pub fn dispatch_message(&self, message: &ChatMessage) -> usize {
        self.messages.dispatch(&message.channel, message)
    }

    pub fn dispatch_ban(&self, ban: &UserBan) -> usize {
        self.bans.dispatch(&ban.channel, ban)
    }

    pub fn dispatch_raid(&self, raid: &RaidNotification) -> usize {
        self.raids.dispatch(&raid.channel, raid)
    }

    pub fn dispatch_disconnected(&self, reason: &str) -> usize {
        let callbacks = self.disconnected.lock().snapshot();
        let payload = Disconnect {
            reason: reason.to_string(),
        };
        invoke_all(&callbacks, &payload, "disconnected", "*");
        callbacks.len()
    }
}
