//! Key Registry
//!
//! The registry maps each key to the single live store for that key. Every
//! caller that needs a key goes through [`KeyRegistry::attach`], and pairs it
//! with exactly one [`KeyRegistry::detach`] when done.
//!
//! # Uniqueness
//!
//! Get-or-create runs under the map's per-key shard lock, so concurrent
//! attaches for one key from several threads still yield one store.
//!
//! # Eviction
//!
//! When the last attachment is released the entry is dropped, unless the
//! store still has a debounce timer armed or a write in flight. In that case
//! eviction waits until the store settles. A caller attaching during that
//! window gets the draining store back, which already holds the newest value.

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::backend::DurableBackend;
use crate::config::StoreConfig;
use crate::error::{ErrorHandler, StoreError, StoreResult};
use crate::reactive::{HybridStore, StoreValue};

/// Type-erased view of a store, as kept by the registry.
trait ErasedStore: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn has_pending_writes(&self) -> bool;

    fn settled(self: Arc<Self>) -> BoxFuture<'static, ()>;

    fn runtime(&self) -> &Handle;
}

impl<T: StoreValue> ErasedStore for HybridStore<T> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn has_pending_writes(&self) -> bool {
        HybridStore::has_pending_writes(self)
    }

    fn settled(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move { HybridStore::settled(&self).await }.boxed()
    }

    fn runtime(&self) -> &Handle {
        HybridStore::runtime(self)
    }
}

struct Slot {
    store: Arc<dyn ErasedStore>,
    attachments: usize,
}

/// Index of live stores, one per key.
///
/// Cheap to clone; clones share the same map. Construct one per application
/// (or per test) and hand it to everything that attaches stores.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live store for `key`, or build one with `factory` and
    /// register it.
    ///
    /// `factory` runs while the key's shard is locked and must not call back
    /// into the registry.
    pub fn attach<T, F>(&self, key: &str, factory: F) -> StoreResult<Arc<HybridStore<T>>>
    where
        T: StoreValue,
        F: FnOnce(&str) -> StoreResult<Arc<HybridStore<T>>>,
    {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let store = downcast::<T>(key, &occupied.get().store)?;
                occupied.get_mut().attachments += 1;
                debug!(key, attachments = occupied.get().attachments, "attached to live store");
                Ok(store)
            }
            Entry::Vacant(vacant) => {
                let store = factory(key)?;
                vacant.insert(Slot {
                    store: Arc::clone(&store) as Arc<dyn ErasedStore>,
                    attachments: 1,
                });
                debug!(key, "created store");
                Ok(store)
            }
        }
    }

    /// [`attach`](Self::attach) with the standard store constructor.
    pub fn attach_with<T: StoreValue>(
        &self,
        key: &str,
        default_value: T,
        backend: Arc<dyn DurableBackend>,
        config: StoreConfig,
        on_error: ErrorHandler,
    ) -> StoreResult<Arc<HybridStore<T>>> {
        self.attach(key, move |key| {
            HybridStore::with_config(key, default_value, backend, config, on_error)
        })
    }

    /// Release one attachment of `key`.
    pub fn detach(&self, key: &str) {
        let store = {
            let Some(mut slot) = self.slots.get_mut(key) else {
                warn!(key, "detach of a key that is not attached");
                return;
            };
            slot.attachments = slot.attachments.saturating_sub(1);
            if slot.attachments > 0 {
                return;
            }
            Arc::clone(&slot.store)
        };

        if !store.has_pending_writes() {
            self.evict_if_idle(key, &store);
            return;
        }

        debug!(key, "eviction deferred until pending writes settle");
        let registry = self.clone();
        let key = key.to_string();
        let runtime = store.runtime().clone();
        runtime.spawn(async move {
            Arc::clone(&store).settled().await;
            registry.evict_if_idle(&key, &store);
        });
    }

    fn evict_if_idle(&self, key: &str, store: &Arc<dyn ErasedStore>) {
        let removed = self.slots.remove_if(key, |_, slot| {
            slot.attachments == 0 && Arc::ptr_eq(&slot.store, store)
        });
        if removed.is_some() {
            debug!(key, "evicted store");
        }
    }

    /// The live store for `key`, without attaching.
    pub fn get<T: StoreValue>(&self, key: &str) -> StoreResult<Option<Arc<HybridStore<T>>>> {
        match self.slots.get(key) {
            Some(slot) => downcast::<T>(key, &slot.store).map(Some),
            None => Ok(None),
        }
    }

    /// Number of registered stores, including ones draining.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Current attachment count of `key`; zero if not registered.
    pub fn attachments(&self, key: &str) -> usize {
        self.slots.get(key).map_or(0, |slot| slot.attachments)
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("stores", &self.slots.len())
            .finish()
    }
}

fn downcast<T: StoreValue>(
    key: &str,
    store: &Arc<dyn ErasedStore>,
) -> StoreResult<Arc<HybridStore<T>>> {
    Arc::clone(store)
        .into_any()
        .downcast::<HybridStore<T>>()
        .map_err(|_| StoreError::TypeMismatch {
            key: key.to_string(),
        })
}
