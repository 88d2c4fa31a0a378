//! Change Poller
//!
//! A poller belongs to one caller, not to a store. It periodically runs
//! [`HybridStore::reconcile`] so writes made outside the store (another
//! process, another backend handle) become visible.
//!
//! The poller holds only a weak reference to the store and stops on its own
//! once the store is gone. Errors never end the loop; they go to the caller's
//! handler and the next tick runs as usual.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::store::{HybridStore, StoreValue};
use crate::error::ErrorHandler;

/// Handle to a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct ChangePoller {
    key: String,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ChangePoller {
    /// Start polling `store` every `requested` interval, clamped to the
    /// store's configured floor. The first check happens one interval from now.
    pub fn start<T: StoreValue>(
        store: &Arc<HybridStore<T>>,
        requested: Duration,
        on_error: ErrorHandler,
    ) -> Self {
        let interval = store.config().clamp_poll_interval(requested);
        let key = store.key().to_string();
        let weak = Arc::downgrade(store);

        let task = store.runtime().spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    trace!("store dropped, poller exiting");
                    break;
                };
                match store.reconcile().await {
                    Ok(true) => debug!(key = %store.key(), "poll picked up external change"),
                    Ok(false) => {}
                    Err(err) => on_error(&err),
                }
            }
        });

        trace!(key = %key, ?interval, "poller started");
        Self {
            key,
            interval,
            task: Some(task),
        }
    }

    /// The effective interval after clamping.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            trace!(key = %self.key, "poller stopped");
        }
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
