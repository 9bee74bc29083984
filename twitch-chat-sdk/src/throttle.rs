//! Outbound chat rate limiting.
//!
//! Twitch drops (and eventually locks out) accounts that exceed the chat
//! limit, so every PRIVMSG goes through a sliding-window limiter before it
//! reaches the socket.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Messages allowed per window for a verified/moderator bot account.
pub const DEFAULT_LIMIT: usize = 750;
/// Length of the rate window.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30);

/// Sliding-window limiter: at most `limit` acquisitions per `period`.
#[derive(Debug)]
pub struct Throttle {
    limit: usize,
    period: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_PERIOD)
    }
}

impl Throttle {
    /// A `limit` of zero is treated as one.
    pub fn new(limit: usize, period: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            period,
            sent: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now()).is_none()
    }

    /// Take a slot if one is free. Otherwise returns how long until one
    /// frees up.
    pub fn poll_acquire(&self) -> Option<Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// Wait until a slot is free, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire_at(Instant::now()) {
                None => return,
                Some(wait) => wait,
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Chat throttle engaged");
            tokio::time::sleep(wait).await;
        }
    }

    /// Returns `None` on success, or how long until the oldest slot expires.
    fn try_acquire_at(&self, now: Instant) -> Option<Duration> {
        let mut sent = self.sent.lock();
        while let Some(&oldest) = sent.front() {
            if now.duration_since(oldest) >= self.period {
                sent.pop_front();
            } else {
                break;
            }
        }
        if sent.len() < self.limit {
            sent.push_back(now);
            return None;
        }
        let oldest = sent.front().copied().unwrap_or(now);
        Some((oldest + self.period).saturating_duration_since(now).max(Duration::from_millis(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_enforced_within_window() {
        let throttle = Throttle::new(2, Duration::from_secs(60));
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[test]
    fn slots_free_up_after_period() {
        let throttle = Throttle::new(1, Duration::from_secs(30));
        let start = Instant::now();
        assert!(throttle.try_acquire_at(start).is_none());
        let wait = throttle.try_acquire_at(start + Duration::from_secs(10)).unwrap();
        assert_eq!(wait, Duration::from_secs(20));
        assert!(throttle.try_acquire_at(start + Duration::from_secs(30)).is_none());
    }

    #[test]
    fn zero_limit_allows_one() {
        let throttle = Throttle::new(0, Duration::from_secs(60));
        assert!(throttle.try_acquire());
        assert!(!throttle.try_acquire());
    }

    #[tokio::test]
    async fn acquire_waits_for_a_slot() {
        let throttle = Throttle::new(1, Duration::from_millis(50));
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
