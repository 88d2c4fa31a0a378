//! Subscriber types for the store engine.
//!
//! A subscriber is a caller-supplied callback attached to one store. It is
//! invoked with the store's value on attach and after every change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::store::{HybridStore, StoreValue};

/// Unique identifier for a subscriber.
///
/// IDs are process-wide so an ID never collides between stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared form of a subscriber callback.
pub type SubscriberFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A callback registered with a store.
pub struct Subscriber<T> {
    id: SubscriberId,
    notify: SubscriberFn<T>,
}

impl<T> Subscriber<T> {
    /// Wrap a callback under a fresh ID.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// A clone of the callback, so it can run after the subscriber lock is released.
    pub fn callback(&self) -> SubscriberFn<T> {
        Arc::clone(&self.notify)
    }
}

/// Handle pairing one callback with one store.
///
/// Dropping the handle unsubscribes. The handle only holds a weak reference,
/// so it never keeps a store alive on its own.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription<T: StoreValue> {
    id: SubscriberId,
    store: Weak<HybridStore<T>>,
    active: bool,
}

impl<T: StoreValue> Subscription<T> {
    pub(crate) fn new(id: SubscriberId, store: Weak<HybridStore<T>>) -> Self {
        Self {
            id,
            store,
            active: true,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the callback is still attached.
    pub fn is_active(&self) -> bool {
        self.active && self.store.strong_count() > 0
    }

    /// Detach the callback. Other subscriptions on the same store are untouched.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

impl<T: StoreValue> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: StoreValue> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn callback_clones_share_one_closure() {
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();

        let subscriber = Subscriber::new(move |value: &i32| {
            seen_clone.store(*value, Ordering::SeqCst);
        });

        let first = subscriber.callback();
        let second = subscriber.callback();
        assert!(Arc::ptr_eq(&first, &second));

        first(&7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        second(&9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }
}
