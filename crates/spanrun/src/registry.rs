//! # Subscriber Registry
//!
//! Tracks event handlers per message kind on the caller side.
//!
//! ## Invariants
//!
//! - **Token-scoped revocation**: unsubscribing removes exactly the handler
//!   instance that was registered, and is a no-op the second time.
//! - **Isolated delivery**: a panicking handler never suppresses delivery to
//!   the remaining handlers for the same event.

use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use serde_json::Value;

use spanwire::Kind;

pub(crate) type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Mapping from message kind to the set of live handler callbacks.
pub struct SubscriberRegistry {
    entries: DashMap<Kind, Vec<(u64, Callback)>>,
    next_token: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self { entries: DashMap::new(), next_token: AtomicU64::new(1) }
    }

    /// Register a callback under `kind`. Returns the revocation token.
    pub(crate) fn add(&self, kind: Kind, callback: Callback) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.entries.entry(kind).or_default().push((token, callback));
        token
    }

    /// Remove the callback registered under `token`, if it is still present.
    pub(crate) fn remove(&self, kind: Kind, token: u64) {
        if let Some(mut handlers) = self.entries.get_mut(&kind) {
            handlers.retain(|(t, _)| *t != token);
        }
    }

    /// Drop every registered callback, for all kinds. Teardown path.
    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live handlers for `kind`.
    pub fn count(&self, kind: Kind) -> usize {
        self.entries.get(&kind).map_or(0, |handlers| handlers.len())
    }

    /// Deliver one event payload to every handler currently registered for
    /// its kind, in registration order.
    pub(crate) fn dispatch(&self, kind: Kind, payload: &Value) {
        // Snapshot the handlers first: the map guard must not be held while
        // running callbacks, or a handler that (un)subscribes would deadlock.
        let handlers: Vec<Callback> = match self.entries.get(&kind) {
            Some(entry) => entry.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };

        for callback in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::warn!(%kind, "subscriber panicked, continuing delivery");
            }
        }
    }
}

/// Revocation capability returned by `Bridge::subscribe`.
///
/// Calling [`unsubscribe`](Self::unsubscribe) removes exactly the handler
/// this subscription registered; calling it again is a no-op. Dropping the
/// handle without calling it leaves the handler registered for the life of
/// the bridge.
pub struct Subscription {
    pub(crate) registry: Arc<SubscriberRegistry>,
    pub(crate) kind: Kind,
    pub(crate) token: u64,
}

impl Subscription {
    /// Remove the handler this subscription registered. Idempotent.
    pub fn unsubscribe(&self) {
        self.registry.remove(self.kind, self.token);
    }
}
