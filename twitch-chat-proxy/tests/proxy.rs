//! ChatProxy against a spy transport: connection lifecycle, credentials,
//! joins, sends and callback dispatch.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing_test::traced_test;
use twitch_chat_proxy::{
    ChatMessage, Credentials, Disconnect, ProxyConfig, RaidNotification, TransportEvent, UserBan, callback,
};

use common::{Call, LoginOutcome, eventually, message, quiet_config, raid, spy_proxy, spy_proxy_with};

fn counter<T: 'static>() -> (Arc<AtomicUsize>, twitch_chat_proxy::Callback<T>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, callback(move |_: &T| {
        c.fetch_add(1, Ordering::SeqCst);
    }))
}

// ── Connection ──

#[tokio::test]
async fn connect_is_idempotent() {
    let (proxy, spy) = spy_proxy(quiet_config());

    assert!(proxy.connect().await);
    assert!(proxy.connect().await);
    assert_eq!(spy.count(Call::is_connect), 1);
    assert_eq!(
        spy.calls(),
        vec![Call::Connect {
            username: "bot".into(),
            token: "token-1".into(),
        }]
    );
    assert!(proxy.is_connected().await);
}

#[tokio::test]
async fn blank_credentials_never_touch_the_transport() {
    let (proxy, spy) = spy_proxy_with(quiet_config(), Credentials::new("bot", "   "));

    assert!(!proxy.connect().await);
    assert!(!proxy.join_channel("foo").await);
    assert!(spy.calls().is_empty());
    assert!(!proxy.is_connected().await);
}

#[tokio::test]
async fn connect_times_out_without_login_signal() {
    let config = ProxyConfig {
        connect_timeout_ms: 100,
        ..quiet_config()
    };
    let (proxy, spy) = spy_proxy(config);
    spy.set_login_outcome(LoginOutcome::Silent);

    assert!(!proxy.connect().await);
    assert!(!proxy.is_connected().await);

    // The next attempt reconnects instead of connecting again.
    spy.set_login_outcome(LoginOutcome::Accepted);
    assert!(proxy.connect().await);
    assert!(matches!(spy.calls().last(), Some(Call::Reconnect { .. })));
}

async fn assert_connect_fails_fast(outcome: LoginOutcome) {
    let config = ProxyConfig {
        connect_timeout_ms: 10_000,
        ..quiet_config()
    };
    let (proxy, spy) = spy_proxy(config);
    spy.set_login_outcome(outcome);

    let started = tokio::time::Instant::now();
    assert!(!proxy.connect().await);
    assert!(started.elapsed() < Duration::from_secs(2), "{outcome:?} waited for the timeout");
    assert!(!proxy.is_connected().await);
    assert_eq!(spy.count(Call::is_connect), 1);
}

#[tokio::test]
async fn rejected_login_ends_connect_early() {
    assert_connect_fails_fast(LoginOutcome::IncorrectLogin).await;
}

#[tokio::test]
async fn connection_error_ends_connect_early() {
    assert_connect_fails_fast(LoginOutcome::ConnectionError).await;
}

#[tokio::test]
async fn no_permission_leaves_connection_and_dispatch_intact() {
    let (proxy, spy) = spy_proxy(quiet_config());
    let (count, cb) = counter::<ChatMessage>();
    proxy.add_message_callback("foo", cb).await;

    spy.emit(TransportEvent::NoPermission {
        channel: Some("foo".into()),
    });
    spy.emit(TransportEvent::MessageReceived(message("foo", "after")));

    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
    assert!(proxy.is_connected().await);
    assert!(proxy.send_message("foo", "still allowed").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_connects_issue_one_transport_connect() {
    let (proxy, spy) = spy_proxy(quiet_config());
    spy.set_connect_delay(Duration::from_millis(100));

    let a = tokio::spawn({
        let proxy = Arc::clone(&proxy);
        async move { proxy.connect().await }
    });
    let b = tokio::spawn({
        let proxy = Arc::clone(&proxy);
        async move { proxy.connect().await }
    });

    assert!(a.await.unwrap());
    assert!(b.await.unwrap());
    assert_eq!(spy.count(Call::is_connect), 1);
}

// ── Credentials ──

#[tokio::test]
async fn token_change_disconnects_then_reconnects() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.connect().await);
    spy.clear_calls();

    proxy.set_credentials("bot", "token-2").await;

    assert_eq!(
        spy.calls(),
        vec![
            Call::Disconnect,
            Call::Reconnect {
                username: "bot".into(),
                token: "token-2".into(),
            },
        ]
    );
    assert!(proxy.is_connected().await);
}

#[tokio::test]
async fn unchanged_token_is_a_noop() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.connect().await);
    spy.clear_calls();

    proxy.set_credentials("bot", "token-1").await;
    proxy.set_credentials("renamed", "token-1").await;

    assert!(spy.calls().is_empty());
}

#[tokio::test]
async fn blank_new_token_only_disconnects() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.connect().await);
    spy.clear_calls();

    proxy.set_credentials("bot", "").await;

    assert_eq!(spy.calls(), vec![Call::Disconnect]);
    assert!(!proxy.connect().await);
}

#[tokio::test]
async fn credentials_set_before_first_connect_are_used() {
    let (proxy, spy) = spy_proxy_with(quiet_config(), Credentials::default());
    proxy.set_credentials("late", "token-9").await;
    assert!(spy.calls().is_empty());

    assert!(proxy.connect().await);
    assert_eq!(
        spy.calls(),
        vec![Call::Connect {
            username: "late".into(),
            token: "token-9".into(),
        }]
    );
}

// ── Joins and sends ──

#[tokio::test]
async fn join_marks_channel_desired_and_skips_joined_channels() {
    let (proxy, spy) = spy_proxy(quiet_config());

    assert!(proxy.join_channel("#Foo").await);
    assert!(proxy.join_channel("foo").await);

    assert_eq!(proxy.desired_channels(), vec!["foo".to_string()]);
    assert_eq!(spy.count(|c| *c == Call::Join("foo".into())), 1);
}

#[tokio::test]
async fn failed_join_still_records_desired_channel() {
    let (proxy, spy) = spy_proxy(quiet_config());
    spy.set_fail_joins(true);

    assert!(!proxy.join_channel("foo").await);
    assert_eq!(proxy.desired_channels(), vec!["foo".to_string()]);
}

#[tokio::test]
async fn send_goes_out_on_joined_channel() {
    let (proxy, spy) = spy_proxy(quiet_config());

    assert!(proxy.send_message("Foo", "hello").await);
    assert_eq!(
        spy.calls().last(),
        Some(&Call::Send {
            channel: "foo".into(),
            text: "hello".into(),
        })
    );
}

#[traced_test]
#[tokio::test]
async fn every_send_is_logged_with_its_channel() {
    let (proxy, _spy) = spy_proxy(quiet_config());

    assert!(proxy.send_message("Foo", "hello there").await);
    assert!(logs_contain("Sending chat message"));
    assert!(logs_contain("channel=foo"));
    assert!(logs_contain("hello there"));
}

#[tokio::test]
async fn send_gives_up_when_every_join_fails() {
    let (proxy, spy) = spy_proxy(quiet_config());
    spy.set_fail_joins(true);

    assert!(!proxy.send_message("foo", "hello").await);
    assert_eq!(spy.count(|c| matches!(c, Call::Send { .. })), 0);
    assert_eq!(spy.count(|c| *c == Call::Join("foo".into())), 5);

    assert!(!proxy.send_message_with_retries("bar", "hello", 2).await);
    assert_eq!(spy.count(|c| *c == Call::Join("bar".into())), 2);
}

#[tokio::test]
async fn send_waits_for_join_confirmation() {
    let (proxy, spy) = spy_proxy(quiet_config());
    spy.set_auto_join(false);

    // The join is issued but not yet confirmed, so nothing is sent.
    assert!(!proxy.send_message("foo", "hello").await);
    assert_eq!(spy.count(|c| matches!(c, Call::Send { .. })), 0);
    assert!(spy.count(|c| *c == Call::Join("foo".into())) >= 1);
}

#[tokio::test]
async fn send_to_blank_channel_is_rejected() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(!proxy.send_message("  ", "hello").await);
    assert!(!proxy.send_message("#", "hello").await);
    assert!(spy.calls().is_empty());
}

#[tokio::test]
async fn leave_does_not_forget_desired_channel() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.join_channel("foo").await);

    assert!(proxy.leave_channel("foo").await);
    assert_eq!(spy.calls().last(), Some(&Call::Leave("foo".into())));
    assert_eq!(proxy.desired_channels(), vec!["foo".to_string()]);
}

// ── Callbacks ──

#[tokio::test]
async fn message_callback_fires_once_per_event_in_any_case() {
    let (proxy, spy) = spy_proxy(quiet_config());
    let (count, cb) = counter::<ChatMessage>();
    proxy.add_message_callback("SomeChannel", cb).await;

    spy.emit(TransportEvent::MessageReceived(message("somechannel", "hi")));
    spy.emit(TransportEvent::MessageReceived(message("SOMECHANNEL", "hi")));
    spy.emit(TransportEvent::MessageReceived(message("other", "hi")));

    assert!(eventually(|| count.load(Ordering::SeqCst) == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn same_callback_registered_twice_fires_once() {
    let (proxy, spy) = spy_proxy(quiet_config());
    let (count, cb) = counter::<UserBan>();
    let first = proxy.add_banned_callback("foo", Arc::clone(&cb)).await;
    let second = proxy.add_banned_callback("foo", cb).await;
    assert_eq!(first, second);

    spy.emit(TransportEvent::UserBanned(UserBan {
        channel: "foo".into(),
        username: "troll".into(),
        target_user_id: None,
        reason: None,
    }));

    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn callback_registers_even_when_join_fails() {
    let (proxy, spy) = spy_proxy(quiet_config());
    spy.set_fail_joins(true);
    let (count, cb) = counter::<RaidNotification>();

    proxy.add_raid_callback("foo", cb).await;
    spy.emit(TransportEvent::RaidNotification(raid("foo")));

    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
    assert_eq!(proxy.desired_channels(), vec!["foo".to_string()]);
}

#[tokio::test]
async fn removing_unknown_callback_is_a_noop() {
    let (proxy, spy) = spy_proxy(quiet_config());
    let (count, cb) = counter::<ChatMessage>();
    let id = proxy.add_message_callback("foo", cb).await;
    spy.clear_calls();

    assert!(!proxy.remove_message_callback("bar", id));
    assert!(!proxy.remove_raid_callback("foo", id));
    assert!(!proxy.remove_disconnected_callback(id));
    assert!(spy.calls().is_empty());

    spy.emit(TransportEvent::MessageReceived(message("foo", "still here")));
    assert!(eventually(|| count.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn removal_never_joins_or_forgets() {
    let (proxy, spy) = spy_proxy(quiet_config());
    let (count, cb) = counter::<ChatMessage>();
    let id = proxy.add_message_callback("foo", cb).await;
    spy.clear_calls();

    assert!(proxy.remove_message_callback("FOO", id));
    assert!(spy.calls().is_empty());
    assert_eq!(proxy.desired_channels(), vec!["foo".to_string()]);

    spy.emit(TransportEvent::MessageReceived(message("foo", "hi")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_subscriber_does_not_starve_others() {
    let (proxy, spy) = spy_proxy(quiet_config());
    proxy
        .add_message_callback("foo", callback(|_: &ChatMessage| panic!("broken subscriber")))
        .await;
    let (count, cb) = counter::<ChatMessage>();
    proxy.add_message_callback("foo", cb).await;

    spy.emit(TransportEvent::MessageReceived(message("foo", "one")));
    spy.emit(TransportEvent::MessageReceived(message("foo", "two")));

    assert!(eventually(|| count.load(Ordering::SeqCst) == 2).await);
}

#[tokio::test]
async fn disconnect_callbacks_receive_reason() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.connect().await);
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&reasons);
    proxy.add_disconnected_callback(callback(move |d: &Disconnect| r.lock().push(d.reason.clone())));

    spy.drop_connection("socket closed");

    assert!(eventually(|| reasons.lock().len() == 1).await);
    assert_eq!(reasons.lock()[0], "socket closed");
    assert!(!proxy.is_connected().await);
}

// ── Lifecycle ──

#[tokio::test]
async fn shutdown_disconnects_and_refuses_new_connects() {
    let (proxy, spy) = spy_proxy(quiet_config());
    assert!(proxy.connect().await);

    proxy.shutdown().await;

    assert_eq!(spy.calls().last(), Some(&Call::Disconnect));
    assert!(!proxy.connect().await);
    assert_eq!(spy.count(Call::is_connect), 1);
}
