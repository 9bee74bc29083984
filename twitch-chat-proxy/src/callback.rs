//! Multi-subscriber callback lists.
//!
//! Every subscription is identified by a [`SubscriptionId`] handle returned
//! from `add`; removal is by handle. Registering the same `Arc` twice on one
//! list hands back the original handle instead of a second entry, so a
//! subscriber is never invoked twice for one event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A subscriber. Invoked on the proxy's dispatch task, so it should be quick.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Process-wide subscription counter; ids are never reused.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle to one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Ordered list of callbacks for one event kind (and one channel).
pub struct Subscribers<T> {
    entries: Vec<(SubscriptionId, Callback<T>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Subscribers<T> {
    pub fn add(&mut self, cb: Callback<T>) -> SubscriptionId {
        if let Some((id, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&cb)))
        {
            return *id;
        }
        let id = SubscriptionId::next();
        self.entries.push((id, cb));
        id
    }

    /// Returns whether anything was removed.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the current callbacks, for invoking outside a lock.
    pub fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Invoke every callback with `arg`. A panicking subscriber is logged and
/// skipped; the rest still run.
pub fn invoke_all<T>(callbacks: &[Callback<T>], arg: &T, kind: &str, channel: &str) {
    for cb in callbacks {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| cb(arg))) {
            tracing::error!(
                kind,
                channel,
                panic = %panic_message(panic.as_ref()),
                "Subscriber callback panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
