//! Reactive Store Engine
//!
//! This module implements the per-key hybrid store: an in-memory value that
//! callers read and write synchronously, persisted in the background to a
//! durable backend and reconciled with it by polling.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A [`HybridStore`] holds the current value of one key together with the
//! last value it knows to be durable. Writes update memory and notify
//! subscribers immediately; persistence follows, either debounced (a burst of
//! writes produces one backend write with the last value) or immediately.
//!
//! ## Subscriptions
//!
//! A [`Subscription`] pairs one callback with one store. The callback sees
//! the current value as soon as it subscribes and every change after that.
//!
//! ## Reconciliation
//!
//! Writers that bypass the store are only noticed by
//! [`HybridStore::reconcile`], which a [`ChangePoller`] runs on a timer.
//! The comparison is structural on decoded values.

mod debounce;
mod poller;
mod store;
mod subscriber;

pub use poller::ChangePoller;
pub use store::{HybridStore, LoadState, StoreValue};
pub use subscriber::{Subscriber, SubscriberFn, SubscriberId, Subscription};
