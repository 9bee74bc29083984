//! chat-relay: keep a Twitch chat connection alive and relay channel events.
//!
//! Every chat message, ban, raid and disconnect on the given channels is
//! written to stdout as one JSON envelope per line; logs go to stderr.
//!
//!   chat-relay --username mybot --channel somestreamer --channel other
//!
//! The OAuth token is read from `--oauth-token` or `TWITCH_OAUTH_TOKEN`.

mod envelope;

use std::sync::{Arc, Weak};

use anyhow::Result;
use clap::Parser;
use twitch_chat_proxy::{
    ChatMessage, ChatProxy, Credentials, Disconnect, ProxyConfig, RaidNotification, TwitchTransport,
    UserBan, callback,
};
use twitch_chat_sdk::client::TWITCH_CHAT_URL;

use envelope::{RelayEvent, Sequencer};

#[derive(Parser)]
#[command(name = "chat-relay", about = "Relay Twitch chat events as JSON lines")]
struct Args {
    /// Chat login of the bot account
    #[arg(long, env = "TWITCH_USERNAME")]
    username: String,

    /// OAuth token, with or without the `oauth:` prefix
    #[arg(long, env = "TWITCH_OAUTH_TOKEN", hide_env_values = true)]
    oauth_token: String,

    /// Channel to relay (repeatable)
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,

    /// Chat WebSocket URL
    #[arg(long, default_value = TWITCH_CHAT_URL)]
    server_url: String,

    /// Pause between reconnect passes
    #[arg(long, default_value_t = 1000)]
    reconnect_interval_ms: u64,

    /// How long to wait for the server to accept the login
    #[arg(long, default_value_t = 30)]
    connect_timeout_secs: u64,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,

    /// Answer `!ping` with `pong`
    #[arg(long)]
    echo: bool,
}

impl Args {
    fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            server_url: self.server_url.clone(),
            reconnect_interval_ms: self.reconnect_interval_ms,
            connect_timeout_ms: self.connect_timeout_secs * 1000,
            ..ProxyConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat_relay=info,twitch_chat_proxy=info,twitch_chat_sdk=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = args.proxy_config();
    let proxy = ChatProxy::with_credentials(
        config.clone(),
        TwitchTransport::factory(config),
        Credentials::new(&args.username, &args.oauth_token),
    );

    tracing::info!(
        username = %args.username,
        channels = ?args.channels,
        server = %args.server_url,
        "Starting chat-relay"
    );

    if !proxy.connect().await {
        tracing::warn!("Initial connect failed, the supervisor will keep retrying");
    }

    let seq = Arc::new(Sequencer::default());
    subscribe_all(&proxy, &args, &seq).await;

    tracing::info!("Relay running. Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    proxy.shutdown().await;
    Ok(())
}

async fn subscribe_all(proxy: &Arc<ChatProxy>, args: &Args, seq: &Arc<Sequencer>) {
    let s = Arc::clone(seq);
    proxy.add_disconnected_callback(callback(move |d: &Disconnect| {
        s.emit(RelayEvent::Disconnected {
            reason: d.reason.clone(),
        });
    }));

    for channel in &args.channels {
        let s = Arc::clone(seq);
        let echo = args.echo.then(|| Arc::downgrade(proxy));
        proxy
            .add_message_callback(
                channel,
                callback(move |m: &ChatMessage| {
                    s.emit(RelayEvent::Message(m.clone()));
                    if let Some(proxy) = &echo {
                        answer_ping(proxy, m);
                    }
                }),
            )
            .await;

        let s = Arc::clone(seq);
        proxy
            .add_banned_callback(
                channel,
                callback(move |b: &UserBan| {
                    tracing::info!(channel = %b.channel, user = %b.username, "User banned");
                    s.emit(RelayEvent::Ban(b.clone()));
                }),
            )
            .await;

        let s = Arc::clone(seq);
        proxy
            .add_raid_callback(
                channel,
                callback(move |r: &RaidNotification| s.emit(RelayEvent::Raid(r.clone()))),
            )
            .await;

        tracing::info!(%channel, "Subscribed");
    }
}

/// Reply off the dispatch task; sending waits on the connection lock.
fn answer_ping(proxy: &Weak<ChatProxy>, message: &ChatMessage) {
    if message.text.trim() != "!ping" {
        return;
    }
    let Some(proxy) = proxy.upgrade() else {
        return;
    };
    let channel = message.channel.clone();
    tokio::spawn(async move {
        if !proxy.send_message(&channel, "pong").await {
            tracing::warn!(%channel, "Failed to answer ping");
        }
    });
}
