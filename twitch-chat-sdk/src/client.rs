//! Twitch chat client over IRC-over-WebSocket.
//!
//! This is the main entry point for SDK consumers. It opens the WebSocket,
//! requests the Twitch capabilities, logs in with the OAuth token, keeps the
//! connection alive and emits [`Event`]s.
//!
//! ## Reconnection
//!
//! The client does not reconnect by itself. When the socket closes, login
//! fails, or the server sends `RECONNECT`, the connection task emits exactly
//! one [`Event::Disconnected`] and exits. Consumers open a fresh connection
//! with [`connect`] and rejoin their channels.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::error::{Error, Result};
use crate::event::{ChatMessage, Event, RaidNotification, UserBan, UserTimeout};
use crate::irc::Message;
use crate::throttle::{self, Throttle};

/// Twitch's public chat endpoint.
pub const TWITCH_CHAT_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands twitch.tv/membership";

/// Configuration for connecting to Twitch chat.
#[derive(Clone)]
pub struct ConnectConfig {
    /// WebSocket URL of the chat server.
    pub server_url: String,
    /// Login name of the bot account.
    pub username: String,
    /// OAuth token, with or without the `oauth:` prefix.
    pub oauth_token: String,
    /// Chat messages allowed per `throttle_period`.
    pub throttle_limit: usize,
    pub throttle_period: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_url: TWITCH_CHAT_URL.to_string(),
            username: String::new(),
            oauth_token: String::new(),
            throttle_limit: throttle::DEFAULT_LIMIT,
            throttle_period: throttle::DEFAULT_PERIOD,
        }
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("oauth_token", &"<redacted>")
            .field("throttle_limit", &self.throttle_limit)
            .field("throttle_period", &self.throttle_period)
            .finish()
    }
}

impl ConnectConfig {
    fn nick(&self) -> String {
        self.username.trim().to_ascii_lowercase()
    }

    fn pass(&self) -> String {
        let token = self.oauth_token.trim();
        let token = token.strip_prefix("oauth:").unwrap_or(token);
        format!("oauth:{token}")
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Part(String),
    Privmsg { channel: String, text: String },
    Raw(String),
    Quit,
}

/// A handle to a running chat connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn join(&self, channel: &str) -> Result<()> {
        self.send(Command::Join(channel_target(channel))).await
    }

    pub async fn part(&self, channel: &str) -> Result<()> {
        self.send(Command::Part(channel_target(channel))).await
    }

    /// Queue a chat message. The connection task releases queued messages
    /// as the rate limiter allows; this call does not wait for a slot.
    pub async fn privmsg(&self, channel: &str, text: &str) -> Result<()> {
        self.send(Command::Privmsg {
            channel: channel_target(channel),
            text: text.replace(['\r', '\n'], " "),
        })
        .await
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.send(Command::Raw(line.to_string())).await
    }

    /// Close the connection. The task emits `Disconnected` on its way out.
    pub async fn quit(&self) -> Result<()> {
        self.send(Command::Quit).await
    }

    /// True once the connection task has exited.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| Error::Closed)
    }
}

/// Normalize a channel name to its wire form: `#` plus lowercase login.
pub fn channel_target(channel: &str) -> String {
    let name = channel.trim().trim_start_matches('#');
    format!("#{}", name.to_ascii_lowercase())
}

/// Open a connection and log in.
///
/// Socket errors are returned directly. Everything after the socket is open
/// (including a rejected login) is reported through the event receiver.
pub async fn connect(config: ConnectConfig) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    install_crypto_provider();

    tracing::debug!(url = %config.server_url, "Opening chat socket");
    let (ws, _response) = tokio_tungstenite::connect_async(config.server_url.as_str()).await?;
    tracing::debug!(url = %config.server_url, "Chat socket open");

    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };
    let throttle = Throttle::new(config.throttle_limit, config.throttle_period);

    tokio::spawn(async move {
        let reason = match run_irc(ws, &config, &throttle, &event_tx, cmd_rx).await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::warn!(error = %e, "Chat connection failed");
                let _ = event_tx.send(Event::Error { message: e.to_string() }).await;
                e.to_string()
            }
        };
        tracing::debug!(%reason, "Chat connection task exiting");
        let _ = event_tx.send(Event::Disconnected { reason }).await;
    });

    Ok((handle, event_rx))
}

fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn send_line<S>(ws: &mut S, line: &str) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    ws.send(WsMessage::Text(line.to_string().into())).await?;
    Ok(())
}

/// Drive one connection until it ends. Returns the disconnect reason.
async fn run_irc<S>(
    ws: S,
    config: &ConnectConfig,
    throttle: &Throttle,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<String>
where
    S: Stream<Item = std::result::Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let nick = config.nick();
    send_line(&mut sink, &format!("CAP REQ :{CAPABILITIES}")).await?;
    send_line(&mut sink, &format!("PASS {}", config.pass())).await?;
    send_line(&mut sink, &format!("NICK {nick}")).await?;

    let mut registered = false;
    let mut pending_commands: Vec<Command> = Vec::new();
    // Chat messages waiting for a throttle slot, and when to retry.
    let mut outbox: VecDeque<Command> = VecDeque::new();
    let mut outbox_ready = Instant::now();
    let mut last_activity = Instant::now();
    let mut last_ping = last_activity;
    let ping_interval = Duration::from_secs(60);
    let ping_timeout = Duration::from_secs(120);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let frame = match frame {
                    None => return Ok("socket closed".to_string()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(frame)) => frame,
                };
                last_activity = Instant::now();

                match frame {
                    WsMessage::Text(text) => {
                        for line in text.as_str().lines() {
                            let Some(msg) = Message::parse(line) else {
                                continue;
                            };
                            let _ = event_tx.send(Event::RawLine(line.to_string())).await;

                            match msg.command.as_str() {
                                "PING" => {
                                    let token = msg.params.first().map(|s| s.as_str()).unwrap_or("tmi.twitch.tv");
                                    send_line(&mut sink, &format!("PONG :{token}")).await?;
                                    continue;
                                }
                                "001" => {
                                    registered = true;
                                    for cmd in pending_commands.drain(..) {
                                        execute_command(&mut sink, cmd).await?;
                                    }
                                    outbox_ready = flush_outbox(&mut sink, throttle, &mut outbox).await?;
                                }
                                _ => {}
                            }

                            let Some(event) = classify(&msg, &nick) else {
                                continue;
                            };
                            let closing = match &event {
                                Event::IncorrectLogin { reason } => Some(format!("login rejected: {reason}")),
                                Event::ReconnectRequested => Some("server requested reconnect".to_string()),
                                _ => None,
                            };
                            let _ = event_tx.send(event).await;
                            if let Some(reason) = closing {
                                let _ = sink.close().await;
                                return Ok(reason);
                            }
                        }
                    }
                    WsMessage::Ping(payload) => {
                        sink.send(WsMessage::Pong(payload)).await?;
                    }
                    WsMessage::Close(frame) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Ok(reason);
                    }
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    None => {
                        let _ = sink.close().await;
                        return Ok("client handle dropped".to_string());
                    }
                    Some(Command::Quit) => {
                        let _ = sink.close().await;
                        return Ok("quit".to_string());
                    }
                    Some(cmd @ Command::Privmsg { .. }) => {
                        outbox.push_back(cmd);
                        if registered {
                            outbox_ready = flush_outbox(&mut sink, throttle, &mut outbox).await?;
                        }
                    }
                    Some(cmd) if registered => execute_command(&mut sink, cmd).await?,
                    // Twitch drops anything sent before the welcome numeric.
                    Some(cmd) => pending_commands.push(cmd),
                }
            }
            _ = tokio::time::sleep_until(outbox_ready), if registered && !outbox.is_empty() => {
                outbox_ready = flush_outbox(&mut sink, throttle, &mut outbox).await?;
            }
            _ = tokio::time::sleep_until(last_activity.max(last_ping) + ping_interval) => {
                if last_activity.elapsed() >= ping_timeout {
                    return Err(Error::Protocol("ping timeout".to_string()));
                }
                send_line(&mut sink, "PING :tmi.twitch.tv").await?;
                last_ping = Instant::now();
            }
        }
    }
}

/// Send queued chat messages while the throttle has slots. Returns when
/// the next slot frees up.
async fn flush_outbox<S>(ws: &mut S, throttle: &Throttle, outbox: &mut VecDeque<Command>) -> Result<Instant>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    while !outbox.is_empty() {
        if let Some(wait) = throttle.poll_acquire() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, queued = outbox.len(), "Chat throttle engaged");
            return Ok(Instant::now() + wait);
        }
        if let Some(cmd) = outbox.pop_front() {
            execute_command(ws, cmd).await?;
        }
    }
    Ok(Instant::now())
}

/// Execute a single command on the wire.
async fn execute_command<S>(ws: &mut S, cmd: Command) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let line = match cmd {
        Command::Join(channel) => format!("JOIN {channel}"),
        Command::Part(channel) => format!("PART {channel}"),
        Command::Privmsg { channel, text } => Message::new("PRIVMSG", vec![channel.as_str(), text.as_str()]).to_string(),
        Command::Raw(line) => line,
        Command::Quit => "QUIT".to_string(),
    };
    send_line(ws, &line).await
}

/// Turn a server line into an event, if it is one consumers care about.
fn classify(msg: &Message, own_nick: &str) -> Option<Event> {
    match msg.command.as_str() {
        "001" => Some(Event::Connected {
            nick: msg
                .params
                .first()
                .cloned()
                .unwrap_or_else(|| own_nick.to_string()),
        }),
        "JOIN" => Some(Event::Joined {
            channel: msg.channel()?,
            nick: msg.nick()?.to_ascii_lowercase(),
        }),
        "PART" => Some(Event::Parted {
            channel: msg.channel()?,
            nick: msg.nick()?.to_ascii_lowercase(),
        }),
        "PRIVMSG" => chat_message(msg).map(Event::Message),
        "CLEARCHAT" => {
            // Without a target user the whole chat was cleared.
            let channel = msg.channel()?;
            let username = msg.params.get(1)?.to_ascii_lowercase();
            match msg.tag("ban-duration") {
                Some(duration) => Some(Event::UserTimedOut(UserTimeout {
                    channel,
                    username,
                    duration_secs: duration.parse().unwrap_or(0),
                })),
                None => Some(Event::UserBanned(UserBan {
                    channel,
                    username,
                    target_user_id: msg.tag("target-user-id").map(String::from),
                    reason: msg.tag("ban-reason").map(String::from),
                })),
            }
        }
        "USERNOTICE" if msg.tag("msg-id") == Some("raid") => {
            let channel = msg.channel()?;
            let raider_login = msg
                .tag("msg-param-login")
                .or_else(|| msg.tag("login"))
                .unwrap_or_default()
                .to_ascii_lowercase();
            let raider_display_name = msg
                .tag("msg-param-displayName")
                .map(String::from)
                .unwrap_or_else(|| raider_login.clone());
            Some(Event::Raid(RaidNotification {
                channel,
                raider_login,
                raider_display_name,
                viewer_count: msg
                    .tag("msg-param-viewerCount")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            }))
        }
        "NOTICE" => {
            let text = msg.params.last().cloned().unwrap_or_default();
            let msg_id = msg.tag("msg-id").map(String::from);
            if text.contains("Login authentication failed") || text.contains("Improperly formatted auth") {
                Some(Event::IncorrectLogin { reason: text })
            } else if msg_id.as_deref() == Some("no_permission") {
                Some(Event::NoPermission {
                    channel: msg.channel(),
                    text,
                })
            } else {
                Some(Event::Notice {
                    channel: msg.channel(),
                    msg_id,
                    text,
                })
            }
        }
        "RECONNECT" => Some(Event::ReconnectRequested),
        _ => None,
    }
}

fn chat_message(msg: &Message) -> Option<ChatMessage> {
    let channel = msg.channel()?;
    let raw_text = msg.params.get(1)?;
    let username = msg
        .nick()
        .map(|n| n.to_ascii_lowercase())
        .or_else(|| msg.tag("login").map(String::from))
        .unwrap_or_default();

    let text = raw_text
        .strip_prefix("\x01ACTION ")
        .and_then(|t| t.strip_suffix('\x01'))
        .unwrap_or(raw_text)
        .to_string();

    let badges = msg.tag("badges").unwrap_or_default();
    let has_badge = |name: &str| {
        badges
            .split(',')
            .any(|b| b.split('/').next() == Some(name))
    };

    Some(ChatMessage {
        channel,
        user_id: msg.tag("user-id").map(String::from),
        display_name: msg
            .tag("display-name")
            .map(String::from)
            .unwrap_or_else(|| username.clone()),
        username,
        text,
        message_id: msg.tag("id").map(String::from),
        is_moderator: msg.tag("mod") == Some("1") || has_badge("moderator"),
        is_subscriber: msg.tag("subscriber") == Some("1") || has_badge("subscriber"),
        is_broadcaster: has_badge("broadcaster"),
        sent_at: msg
            .tag("tmi-sent-ts")
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(chrono::DateTime::from_timestamp_millis),
        tags: msg.tags.clone(),
    })
}
