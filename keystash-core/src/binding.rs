//! Binding Adapter
//!
//! A [`Binding`] is what a UI layer (or any other caller) holds on to: it
//! attaches to the registry, subscribes a change callback, optionally runs a
//! [`ChangePoller`], and undoes all three when dropped.

use std::sync::Arc;

use tracing::trace;

use crate::backend::DurableBackend;
use crate::config::{BindingOptions, SetOptions};
use crate::error::{log_errors, ErrorHandler, StoreResult};
use crate::reactive::{ChangePoller, HybridStore, StoreValue, Subscription};
use crate::registry::KeyRegistry;

/// Builder returned by [`Binding::builder`].
pub struct BindingBuilder<'r, T: StoreValue> {
    registry: &'r KeyRegistry,
    key: String,
    default_value: T,
    backend: Arc<dyn DurableBackend>,
    options: BindingOptions,
    on_error: ErrorHandler,
    on_change: Option<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<'r, T: StoreValue> BindingBuilder<'r, T> {
    pub fn options(mut self, options: BindingOptions) -> Self {
        self.options = options;
        self
    }

    /// Receive errors from the store (if this binding creates it) and the poller.
    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = on_error;
        self
    }

    /// Called with the current value on attach and after every change.
    pub fn on_change<F>(mut self, on_change: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on_change = Some(Box::new(on_change));
        self
    }

    pub fn attach(self) -> StoreResult<Binding<T>> {
        let Self {
            registry,
            key,
            default_value,
            backend,
            options,
            on_error,
            on_change,
        } = self;

        let store = registry.attach_with(
            &key,
            default_value,
            backend,
            options.store.clone(),
            Arc::clone(&on_error),
        )?;

        let subscription = store.subscribe(move |value| {
            if let Some(on_change) = &on_change {
                on_change(value);
            }
        });

        let poller = options
            .poll_interval
            .map(|interval| ChangePoller::start(&store, interval, Arc::clone(&on_error)));

        trace!(key = %key, polling = poller.is_some(), "binding attached");
        Ok(Binding {
            registry: registry.clone(),
            store,
            subscription: Some(subscription),
            poller,
        })
    }
}

/// A caller's attachment to one key.
///
/// Dropping the binding stops its poller, removes its callback and releases
/// its registry attachment.
pub struct Binding<T: StoreValue> {
    registry: KeyRegistry,
    store: Arc<HybridStore<T>>,
    subscription: Option<Subscription<T>>,
    poller: Option<ChangePoller>,
}

impl<T: StoreValue> Binding<T> {
    /// Start building a binding for `key`.
    pub fn builder<'r>(
        registry: &'r KeyRegistry,
        key: impl Into<String>,
        default_value: T,
        backend: Arc<dyn DurableBackend>,
    ) -> BindingBuilder<'r, T> {
        BindingBuilder {
            registry,
            key: key.into(),
            default_value,
            backend,
            options: BindingOptions::default(),
            on_error: log_errors(),
            on_change: None,
        }
    }

    /// Attach with default options and no change callback.
    pub fn attach(
        registry: &KeyRegistry,
        key: impl Into<String>,
        default_value: T,
        backend: Arc<dyn DurableBackend>,
    ) -> StoreResult<Self> {
        Self::builder(registry, key, default_value, backend).attach()
    }

    pub fn key(&self) -> &str {
        self.store.key()
    }

    /// The shared store behind this binding.
    pub fn store(&self) -> &Arc<HybridStore<T>> {
        &self.store
    }

    /// Current in-memory value.
    pub fn value(&self) -> T {
        self.store.get()
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(ChangePoller::is_running)
    }

    /// Set with default options: persisted, debounced.
    pub fn set(&self, value: T) {
        self.store.set(value, SetOptions::default());
    }

    pub fn set_with(&self, value: T, options: SetOptions) {
        self.store.set(value, options);
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.store.update(f, SetOptions::default());
    }

    pub fn update_with<F>(&self, f: F, options: SetOptions)
    where
        F: FnOnce(&T) -> T,
    {
        self.store.update(f, options);
    }

    pub async fn set_async(&self, value: T) -> StoreResult<()> {
        self.store.set_async(value).await
    }

    pub async fn update_async<F>(&self, f: F) -> StoreResult<()>
    where
        F: FnOnce(&T) -> T,
    {
        self.store.update_async(f).await
    }

    pub async fn remove(&self) -> StoreResult<()> {
        self.store.remove().await
    }

    /// Reconcile with the backend now, outside the polling schedule.
    pub async fn check_for_changes(&self) -> StoreResult<bool> {
        self.store.reconcile().await
    }
}

impl<T: StoreValue> Drop for Binding<T> {
    fn drop(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.registry.detach(self.store.key());
        trace!(key = %self.store.key(), "binding detached");
    }
}

impl<T> std::fmt::Debug for Binding<T>
where
    T: StoreValue + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key())
            .field("value", &self.value())
            .field("polling", &self.is_polling())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn bindings_on_one_key_share_a_store() {
        let registry = KeyRegistry::new();
        let backend: Arc<dyn DurableBackend> = Arc::new(MemoryBackend::new());

        let a = Binding::attach(&registry, "theme", "light".to_string(), Arc::clone(&backend)).unwrap();
        let b = Binding::attach(&registry, "theme", "light".to_string(), backend).unwrap();
        a.store().ready().await;

        a.set_with("dark".to_string(), SetOptions::memory_only());
        assert_eq!(b.value(), "dark");
        assert_eq!(registry.attachments("theme"), 2);
    }

    #[tokio::test]
    async fn on_change_sees_initial_and_later_values() {
        let registry = KeyRegistry::new();
        let backend: Arc<dyn DurableBackend> = Arc::new(MemoryBackend::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let binding = Binding::builder(&registry, "n", 0, backend)
            .on_change(move |v| seen_clone.lock().push(*v))
            .attach()
            .unwrap();
        binding.store().ready().await;

        binding.update_with(|v| v + 1, SetOptions::memory_only());
        let seen = seen.lock().clone();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&1));
    }

    #[tokio::test]
    async fn drop_releases_attachment() {
        let registry = KeyRegistry::new();
        let backend: Arc<dyn DurableBackend> = Arc::new(MemoryBackend::new());

        let binding = Binding::attach(&registry, "k", 0, backend).unwrap();
        binding.store().ready().await;
        let store = Arc::clone(binding.store());
        drop(binding);

        assert!(!registry.contains("k"));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_binding_sees_external_writes() {
        let registry = KeyRegistry::new();
        let raw = MemoryBackend::new();
        let backend: Arc<dyn DurableBackend> = Arc::new(raw.clone());

        let binding = Binding::builder(&registry, "k", 0, backend)
            .options(BindingOptions::default().with_polling(Duration::from_millis(500)))
            .attach()
            .unwrap();
        binding.store().ready().await;
        assert!(binding.is_polling());

        raw.set("k", json!(8)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(binding.value(), 8);
    }

    #[tokio::test]
    async fn check_for_changes_reconciles_on_demand() {
        let registry = KeyRegistry::new();
        let raw = MemoryBackend::new();
        let backend: Arc<dyn DurableBackend> = Arc::new(raw.clone());

        let binding = Binding::attach(&registry, "k", 0, backend).unwrap();
        binding.store().ready().await;

        raw.set("k", json!(3)).await.unwrap();
        assert!(binding.check_for_changes().await.unwrap());
        assert_eq!(binding.value(), 3);
        assert!(!binding.check_for_changes().await.unwrap());
    }
}
