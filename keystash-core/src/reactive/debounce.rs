//! Cancel-and-reschedule timer slot.
//!
//! A store owns one slot. Arming it replaces the previously armed task; the
//! replaced task is aborted while it is still sleeping. A task that wakes up
//! must [`claim`](DebounceSlot::claim) the slot before doing any work, which
//! detaches it so later re-arming can no longer abort it mid-write.

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub(crate) struct DebounceSlot {
    generation: u64,
    armed: Option<(u64, JoinHandle<()>)>,
}

impl DebounceSlot {
    /// Reserve the generation for a new timer, aborting the armed one.
    pub(crate) fn rearm(&mut self) -> u64 {
        self.cancel();
        self.generation += 1;
        self.generation
    }

    /// Record the task spawned for `generation`.
    pub(crate) fn install(&mut self, generation: u64, handle: JoinHandle<()>) {
        if generation == self.generation {
            self.armed = Some((generation, handle));
        } else {
            handle.abort();
        }
    }

    /// Called by a woken timer. Returns `false` if it was superseded.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some((armed, _)) if *armed == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Abort the armed timer. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}
