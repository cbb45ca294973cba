//! In-process multicast bus for line events
//!
//! Subscribers are plain callbacks invoked synchronously on the publishing task.
//! `publish` takes a snapshot of the subscriber set under the lock and invokes the
//! callbacks after releasing it, so a subscriber added while a publish is in flight
//! does not see that value, and a callback may itself publish or (un)subscribe
//! without deadlocking. Values published with no subscribers are dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Token returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusInner<T> {
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber<T>>>,
    next_id: AtomicU64,
}

/// Multicast event bus; clones share one subscriber set
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

/// Bus carrying decoded output lines
pub type LineBus = EventBus<String>;

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback for every future value
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, Arc::new(callback));
        id
    }

    /// Remove a subscriber. Returns false if the token was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Deliver `value` to the subscribers registered at call time
    pub fn publish(&self, value: T) {
        let snapshot: Vec<Subscriber<T>> = self.lock().values().cloned().collect();
        for subscriber in snapshot {
            subscriber(&value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, Subscriber<T>>> {
        // A panicking subscriber never runs under the lock, so poisoning only
        // happens if an insert/remove itself panicked; the map is still usable.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone + Send + Sync + 'static> EventBus<T> {
    /// Forward every value published here onto `target`
    pub fn pipe(&self, target: &EventBus<T>) -> SubscriptionId {
        let target = target.clone();
        self.subscribe(move |value: &T| target.publish(value.clone()))
    }
}
