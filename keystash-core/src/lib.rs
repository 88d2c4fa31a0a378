//! Keystash Core
//!
//! This crate provides a hybrid reactive key/value store. It implements:
//!
//! - Per-key in-memory stores with synchronous reads and writes
//! - Debounced or immediate background persistence to a durable backend
//! - Reconciliation of external writes through polling
//! - A registry that keeps exactly one live store per key
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `backend`: the durable backend contract and reference backends
//! - `reactive`: stores, subscriptions and change polling
//! - `registry`: the per-key index of live stores
//! - `binding`: the caller-facing adapter tying the pieces together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keystash_core::{Binding, KeyRegistry, MemoryBackend};
//!
//! let registry = KeyRegistry::new();
//! let backend = Arc::new(MemoryBackend::new());
//!
//! let count = Binding::builder(&registry, "count", 0, backend)
//!     .on_change(|v| println!("count = {v}"))
//!     .attach()?;
//!
//! // Memory and subscribers update now, the backend 100ms later.
//! count.update(|v| v + 1);
//! ```

pub mod backend;
pub mod binding;
pub mod config;
pub mod error;
pub mod reactive;
pub mod registry;

pub use backend::{Capabilities, DurableBackend, FileBackend, MemoryBackend, ValueCodec};
pub use binding::{Binding, BindingBuilder};
pub use config::{BindingOptions, SetOptions, StoreConfig};
pub use error::{BackendError, BackendResult, ErrorHandler, StoreError, StoreResult};
pub use reactive::{ChangePoller, HybridStore, LoadState, StoreValue, Subscription};
pub use registry::KeyRegistry;
