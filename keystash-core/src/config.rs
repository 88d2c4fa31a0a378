//! Configuration types for stores, writes and bindings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::ValueCodec;

/// Default debounce window for persisted writes.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Lowest polling interval a caller may request.
pub const DEFAULT_MIN_POLL_INTERVAL_MS: u64 = 500;

/// Per-store configuration.
///
/// Deserializable so applications can keep it next to their own settings;
/// missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Delay between the last `set` and the write it triggers.
    pub debounce_ms: u64,

    /// Floor applied to every polling interval.
    pub min_poll_interval_ms: u64,

    /// Encoding used on the raw path of backends that store bytes natively.
    pub codec: ValueCodec,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            min_poll_interval_ms: DEFAULT_MIN_POLL_INTERVAL_MS,
            codec: ValueCodec::default(),
        }
    }
}

impl StoreConfig {
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = duration_to_ms(debounce);
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval_ms = duration_to_ms(interval);
        self
    }

    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    /// Clamp a requested polling interval to the configured floor.
    pub fn clamp_poll_interval(&self, requested: Duration) -> Duration {
        requested.max(self.min_poll_interval())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// How a single `set` reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    /// Write the value to the backend at all.
    pub persist: bool,

    /// Coalesce with other writes inside the debounce window.
    pub debounce: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            persist: true,
            debounce: true,
        }
    }
}

impl SetOptions {
    /// Update memory and subscribers only.
    pub fn memory_only() -> Self {
        Self {
            persist: false,
            debounce: false,
        }
    }

    /// Persist right away, skipping the debounce window.
    pub fn immediate() -> Self {
        Self {
            persist: true,
            debounce: false,
        }
    }
}

/// Options for a [`Binding`](crate::binding::Binding).
#[derive(Debug, Clone, Default)]
pub struct BindingOptions {
    /// Store configuration used if this binding creates the store.
    pub store: StoreConfig,

    /// Start a change poller with this interval (clamped to the floor).
    pub poll_interval: Option<Duration>,
}

impl BindingOptions {
    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_polling(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}
