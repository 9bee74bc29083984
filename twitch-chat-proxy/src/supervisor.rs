//! Reconnect supervisor.
//!
//! A background loop that sleeps, then brings the connection back up and
//! rejoins every desired channel. The next sleep starts only after the
//! pass finishes, so passes never overlap and a slow pass delays the next
//! one rather than skipping it.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::proxy::ChatProxy;

/// Spawn the loop. It ends once the proxy has been dropped.
pub(crate) fn spawn(proxy: Weak<ChatProxy>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(proxy) = proxy.upgrade() else {
                break;
            };
            tick(&proxy).await;
        }
        tracing::debug!("Reconnect supervisor stopped");
    })
}

/// One pass: connect, then issue a join for each desired channel the
/// transport does not report joined.
pub(crate) async fn tick(proxy: &ChatProxy) {
    if !proxy.connect().await {
        tracing::trace!("Supervisor pass: not connected");
        return;
    }
    for channel in proxy.desired_channels() {
        if !proxy.join_channel(&channel).await {
            tracing::debug!(%channel, "Supervisor rejoin failed");
        }
    }
}
