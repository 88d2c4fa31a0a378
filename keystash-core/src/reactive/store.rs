//! Hybrid Store Implementation
//!
//! A `HybridStore` owns the in-memory value of one key. Reads and writes hit
//! memory synchronously; persistence to the [`DurableBackend`] happens in the
//! background, optionally debounced.
//!
//! # How a Store Works
//!
//! 1. On construction the store enters `Loading` and spawns the initial read
//!    from the backend. Until it resolves, the value is the default.
//!
//! 2. `set` swaps the value, notifies every subscriber, and then (depending on
//!    [`SetOptions`]) arms the debounce timer or spawns an immediate write.
//!
//! 3. When the debounce timer fires it writes whatever value is current at
//!    that moment, so a burst of writes reaches the backend once.
//!
//! 4. `reconcile` reads the backend and compares it structurally with the
//!    last value the store knows to be durable. A difference means somebody
//!    else wrote the key; the store adopts that value and notifies.
//!
//! # Failure Policy
//!
//! Memory is authoritative. A failed write never rolls memory back; errors
//! from background work go to the store's [`ErrorHandler`]. Operations the
//! caller awaits (`set_async`, `remove`, `flush`, `reconcile`) return their
//! errors instead.
//!
//! # Locking
//!
//! The value sits behind a short `parking_lot` lock that is never held while
//! subscriber callbacks run or while awaiting the backend. Backend writes of
//! one store are serialized by an async write lock, and every write persists
//! the value that is current once it holds that lock. The last write to land
//! therefore always carries the newest value, whatever order the queued
//! writes were scheduled in.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::debounce::DebounceSlot;
use super::subscriber::{Subscriber, SubscriberFn, SubscriberId, Subscription};
use crate::backend::DurableBackend;
use crate::config::{SetOptions, StoreConfig};
use crate::error::{log_errors, BackendResult, ErrorHandler, StoreError, StoreResult};

/// Values a store can hold.
///
/// Anything serde can round-trip through JSON-like data and that can be
/// shared between threads.
pub trait StoreValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Hydration state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Constructed, initial load not yet started.
    Uninitialized,

    /// Initial load in flight; the value is the default.
    Loading,

    /// Initial load resolved (successfully or not).
    Ready,
}

/// Mutable core of a store, guarded by one lock.
struct StoreState<T> {
    value: T,

    /// What the store believes is persisted. `None` means absent.
    last_durable: Option<Value>,

    /// Bumped on every change of `value`.
    revision: u64,

    /// Bumped on every change of `last_durable`.
    durable_epoch: u64,

    /// Bumped when a `remove` starts. Writes requested before it are dropped.
    removals: u64,
}

/// Counts outstanding persistence work while alive.
struct PendingGuard(Arc<watch::Sender<usize>>);

impl PendingGuard {
    fn new(pending: &Arc<watch::Sender<usize>>) -> Self {
        pending.send_modify(|n| *n += 1);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// In-memory cache of one key with background persistence.
///
/// Always handled as `Arc<HybridStore<T>>`; background tasks keep the store
/// alive until they finish.
///
/// # Example
///
/// ```rust,ignore
/// let backend = Arc::new(MemoryBackend::new());
/// let store = HybridStore::new("count", 0, backend)?;
///
/// let _sub = store.subscribe(|v| println!("count = {v}"));
/// store.set(5, SetOptions::default()); // prints, persists 100ms later
/// ```
pub struct HybridStore<T: StoreValue> {
    key: String,
    default_value: T,
    config: StoreConfig,
    backend: Arc<dyn DurableBackend>,
    on_error: ErrorHandler,
    runtime: Handle,
    self_ref: Weak<Self>,

    state: RwLock<StoreState<T>>,
    subscribers: RwLock<IndexMap<SubscriberId, Subscriber<T>>>,
    debounce: Mutex<DebounceSlot>,
    write_lock: tokio::sync::Mutex<()>,
    pending: Arc<watch::Sender<usize>>,
    load_state: watch::Sender<LoadState>,
}

impl<T: StoreValue> HybridStore<T> {
    /// Create a store with the default configuration and logging error handler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        key: impl Into<String>,
        default_value: T,
        backend: Arc<dyn DurableBackend>,
    ) -> StoreResult<Arc<Self>> {
        Self::with_config(key, default_value, backend, StoreConfig::default(), log_errors())
    }

    /// Create a store and start its initial load.
    ///
    /// Must be called from within a tokio runtime; the runtime handle is kept
    /// so later writes can be spawned from any thread.
    pub fn with_config(
        key: impl Into<String>,
        default_value: T,
        backend: Arc<dyn DurableBackend>,
        config: StoreConfig,
        on_error: ErrorHandler,
    ) -> StoreResult<Arc<Self>> {
        let key = key.into();
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime { key: key.clone() })?;

        let store = Arc::new_cyclic(|self_ref| Self {
            state: RwLock::new(StoreState {
                value: default_value.clone(),
                last_durable: None,
                revision: 0,
                durable_epoch: 0,
                removals: 0,
            }),
            key,
            default_value,
            config,
            backend,
            on_error,
            runtime,
            self_ref: self_ref.clone(),
            subscribers: RwLock::new(IndexMap::new()),
            debounce: Mutex::new(DebounceSlot::default()),
            write_lock: tokio::sync::Mutex::new(()),
            pending: Arc::new(watch::Sender::new(0)),
            load_state: watch::Sender::new(LoadState::Uninitialized),
        });

        store.begin_load();
        Ok(store)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn load_state(&self) -> LoadState {
        *self.load_state.borrow()
    }

    /// Wait until the initial load has resolved.
    pub async fn ready(&self) {
        let mut rx = self.load_state.subscribe();
        loop {
            let ready = *rx.borrow_and_update() == LoadState::Ready;
            if ready || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether a debounce timer is armed or a write is in flight.
    pub fn has_pending_writes(&self) -> bool {
        *self.pending.borrow() > 0
    }

    /// Wait until no debounce timer is armed and no write is in flight.
    pub async fn settled(&self) {
        let mut rx = self.pending.subscribe();
        loop {
            let idle = *rx.borrow_and_update() == 0;
            if idle || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.state.read().value.clone()
    }

    /// Borrow the current value without cloning it.
    ///
    /// The store's lock is held while `f` runs; `f` must not write to the store.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.read().value)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    // ------------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------------

    /// Register a callback. It is invoked once right away with the current
    /// value (the default while loading) and then after every change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let subscriber = Subscriber::new(callback);
        let id = subscriber.id();
        let notify = subscriber.callback();
        self.subscribers.write().insert(id, subscriber);

        let current = self.get();
        notify(&current);

        Subscription::new(id, self.self_ref.clone())
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().shift_remove(&id);
    }

    /// Call every subscriber in registration order.
    fn notify(&self, value: &T) {
        let callbacks: SmallVec<[SubscriberFn<T>; 4]> = self
            .subscribers
            .read()
            .values()
            .map(Subscriber::callback)
            .collect();

        for notify in callbacks {
            notify(value);
        }
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Overwrite the value and notify subscribers before returning.
    ///
    /// Never suspends and never fails; persistence errors go to the error
    /// handler.
    pub fn set(&self, value: T, options: SetOptions) {
        self.replace(value);

        if !options.persist {
            trace!(key = %self.key, "memory-only set");
        } else if options.debounce {
            self.arm_debounce();
        } else {
            self.spawn_write();
        }
    }

    /// Compute the next value from the current one and [`set`](Self::set) it.
    ///
    /// The store's lock is held while `f` runs.
    pub fn update<F>(&self, f: F, options: SetOptions)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.state.read().value);
        self.set(next, options);
    }

    /// Overwrite and notify like [`set`](Self::set), then write straight to
    /// the backend and wait for it to confirm.
    ///
    /// Cancels any armed debounce timer; the write it would have made is
    /// superseded by this one. If a newer value is set before the write lock
    /// is acquired, the newer value is what gets persisted.
    pub async fn set_async(&self, value: T) -> StoreResult<()> {
        self.replace(value);
        self.debounce.lock().cancel();

        let removals = self.removals();
        let _pending = PendingGuard::new(&self.pending);
        self.write_latest(removals).await
    }

    /// Like [`update`](Self::update) but persists through [`set_async`](Self::set_async).
    pub async fn update_async<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.state.read().value);
        self.set_async(next).await
    }

    /// Delete the key from the backend, then reset memory to the default.
    ///
    /// Memory is reset even if the delete fails; the error is returned.
    /// Writes queued before the call are dropped instead of recreating the key.
    pub async fn remove(&self) -> StoreResult<()> {
        self.debounce.lock().cancel();
        self.state.write().removals += 1;
        let _pending = PendingGuard::new(&self.pending);

        let result = {
            let _write = self.write_lock.lock().await;
            self.backend.remove(&self.key).await
        };

        let value = {
            let mut state = self.state.write();
            state.value = self.default_value.clone();
            state.last_durable = None;
            state.revision += 1;
            state.durable_epoch += 1;
            state.value.clone()
        };
        debug!(key = %self.key, "removed");
        self.notify(&value);

        result.map_err(|source| StoreError::Remove {
            key: self.key.clone(),
            source,
        })
    }

    /// Write the current value now if a debounce timer is armed.
    pub async fn flush(&self) -> StoreResult<()> {
        if !self.debounce.lock().cancel() {
            return Ok(());
        }
        let removals = self.removals();
        let _pending = PendingGuard::new(&self.pending);
        self.write_latest(removals).await
    }

    /// Swap the value and notify.
    fn replace(&self, value: T) {
        let current = {
            let mut state = self.state.write();
            state.value = value;
            state.revision += 1;
            state.value.clone()
        };
        self.notify(&current);
    }

    fn removals(&self) -> u64 {
        self.state.read().removals
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Compare the backend with the last known durable value and adopt the
    /// backend's value if they differ.
    ///
    /// Returns whether the value changed. Comparison is structural, so map
    /// key order does not matter.
    ///
    /// A local write or persist that overlaps the read wins: the read may
    /// predate it, so nothing is adopted and the next reconcile looks again.
    pub async fn reconcile(&self) -> StoreResult<bool> {
        let (revision, epoch) = {
            let state = self.state.read();
            (state.revision, state.durable_epoch)
        };

        let durable = self
            .read_durable()
            .await
            .map_err(|source| StoreError::Reconcile {
                key: self.key.clone(),
                source,
            })?;

        if self.state.read().last_durable == durable {
            return Ok(false);
        }

        let adopted = self.decode(durable.as_ref())?;

        // No write may be in flight while deciding.
        let _write = self.write_lock.lock().await;
        let value = {
            let mut state = self.state.write();
            if state.revision != revision || state.durable_epoch != epoch {
                trace!(key = %self.key, "local write overlapped reconcile");
                return Ok(false);
            }
            state.value = adopted;
            state.last_durable = durable;
            state.revision += 1;
            state.durable_epoch += 1;
            state.value.clone()
        };
        debug!(key = %self.key, "adopted external change");
        self.notify(&value);
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------------

    fn begin_load(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        self.load_state.send_replace(LoadState::Loading);
        self.runtime.spawn(async move { this.load().await });
    }

    async fn load(&self) {
        let (revision, epoch) = {
            let state = self.state.read();
            (state.revision, state.durable_epoch)
        };

        let durable = match self.read_durable().await {
            Ok(durable) => durable,
            Err(source) => {
                self.report(StoreError::Load {
                    key: self.key.clone(),
                    source,
                });
                None
            }
        };

        let loaded = match self.decode(durable.as_ref()) {
            Ok(value) => value,
            Err(err) => {
                self.report(err);
                self.default_value.clone()
            }
        };

        let value = {
            let mut state = self.state.write();
            if state.durable_epoch == epoch {
                state.last_durable = durable;
                state.durable_epoch += 1;
            }
            // A local write made while loading wins over the loaded value.
            if state.revision == revision {
                state.value = loaded;
                state.revision += 1;
            }
            state.value.clone()
        };

        self.load_state.send_replace(LoadState::Ready);
        debug!(key = %self.key, "loaded");
        self.notify(&value);
    }

    fn arm_debounce(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let delay = self.config.debounce();

        let removals = self.removals();
        let mut slot = self.debounce.lock();
        let generation = slot.rearm();
        let pending = PendingGuard::new(&self.pending);
        let handle = self.runtime.spawn(async move {
            let _pending = pending;
            tokio::time::sleep(delay).await;
            if !this.debounce.lock().claim(generation) {
                return;
            }
            if let Err(err) = this.write_latest(removals).await {
                this.report(err);
            }
        });
        slot.install(generation, handle);
    }

    fn spawn_write(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let removals = self.removals();
        let pending = PendingGuard::new(&self.pending);
        self.runtime.spawn(async move {
            let _pending = pending;
            if let Err(err) = this.write_latest(removals).await {
                this.report(err);
            }
        });
    }

    /// Persist whatever value is current once the write lock is held.
    ///
    /// `removals` is the remove count when the write was requested; if a
    /// `remove` started since, the write is dropped.
    async fn write_latest(&self, removals: u64) -> StoreResult<()> {
        let _write = self.write_lock.lock().await;
        let current = {
            let state = self.state.read();
            if state.removals != removals {
                trace!(key = %self.key, "write superseded by remove");
                return Ok(());
            }
            state.value.clone()
        };
        self.write_locked(&current).await
    }

    async fn write_locked(&self, value: &T) -> StoreResult<()> {
        let encoded = serde_json::to_value(value).map_err(|e| StoreError::Encode {
            key: self.key.clone(),
            message: e.to_string(),
        })?;

        self.write_durable(encoded.clone())
            .await
            .map_err(|source| StoreError::Persist {
                key: self.key.clone(),
                source,
            })?;

        let mut state = self.state.write();
        state.last_durable = Some(encoded);
        state.durable_epoch += 1;
        trace!(key = %self.key, "persisted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Backend access
    // ------------------------------------------------------------------------

    async fn read_durable(&self) -> BackendResult<Option<Value>> {
        if self.backend.capabilities().raw_native {
            match self.backend.get_raw(&self.key).await? {
                Some(bytes) => self.config.codec.decode(&bytes).map(Some),
                None => Ok(None),
            }
        } else {
            self.backend.get(&self.key).await
        }
    }

    async fn write_durable(&self, value: Value) -> BackendResult<()> {
        if self.backend.capabilities().raw_native {
            let bytes = self.config.codec.encode(&value)?;
            self.backend.set_raw(&self.key, bytes).await
        } else {
            self.backend.set(&self.key, value).await
        }
    }

    /// Turn a durable value into `T`; absence maps to the default.
    fn decode(&self, durable: Option<&Value>) -> StoreResult<T> {
        match durable {
            Some(value) => T::deserialize(value).map_err(|e| StoreError::Decode {
                key: self.key.clone(),
                message: e.to_string(),
            }),
            None => Ok(self.default_value.clone()),
        }
    }

    fn report(&self, err: StoreError) {
        (self.on_error)(&err);
    }
}

impl<T> Debug for HybridStore<T>
where
    T: StoreValue + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridStore")
            .field("key", &self.key)
            .field("value", &self.state.read().value)
            .field("load_state", &self.load_state())
            .field("subscriber_count", &self.subscriber_count())
            .field("pending_writes", &self.has_pending_writes())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
