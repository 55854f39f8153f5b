//! One-shot termination gate.
//!
//! Armed when a transport request is issued and released exactly once when
//! the download reaches a terminal state. Waiting on a gate that was never
//! armed, or that was already released, returns immediately, so a waiter can
//! never miss a release that happened before it arrived.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    released: bool,
}

impl GateState {
    fn pending(&self) -> bool {
        self.armed && !self.released
    }
}

/// Blocking and async wait point for one download's termination.
#[derive(Debug, Default)]
pub struct TerminationGate {
    state: Mutex<GateState>,
    condvar: Condvar,
    notify: Notify,
}

impl TerminationGate {
    /// Creates an unarmed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the gate as expecting a release.
    pub fn arm(&self) {
        self.lock().armed = true;
    }

    /// Releases every current and future waiter. Returns false if the gate
    /// was already released.
    pub fn release(&self) -> bool {
        {
            let mut state = self.lock();
            if state.released {
                return false;
            }
            state.released = true;
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    /// Returns true while a release is expected but has not happened yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().pending()
    }

    /// Blocks the calling thread until the gate is released.
    ///
    /// Must not be called from a thread that drives the transport's I/O.
    pub fn wait(&self) {
        let mut state = self.lock();
        while state.pending() {
            state = self
                .condvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits asynchronously until the gate is released.
    pub async fn wait_async(&self) {
        loop {
            // Registered on creation, so a release between the check and
            // the await is not lost.
            let notified = self.notify.notified();
            if !self.is_pending() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
