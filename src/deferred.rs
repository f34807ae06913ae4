//! One-shot result slots
//!
//! A request is modelled as a [`Completer`] / [`Deferred`] pair sharing one
//! slot. The producer completes the slot at most once; the consumer either
//! polls it from the render loop with [`Deferred::try_take`] or blocks on it
//! from a worker with [`Deferred::wait`]. A completer dropped without being
//! completed resolves the slot with [`GlassError::Unresolved`], so a waiter
//! can never hang on a lost request.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::error::{GlassError, Result};

enum SlotState<T> {
    Pending,
    Ready(Result<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn resolve(&self, result: Result<T>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, SlotState::Pending) {
            return false;
        }
        *state = SlotState::Ready(result);
        self.ready.notify_all();
        true
    }
}

/// Producer half of a request
pub struct Completer<T> {
    slot: Arc<Slot<T>>,
    request: &'static str,
    done: bool,
}

/// Consumer half of a request
pub struct Deferred<T> {
    slot: Arc<Slot<T>>,
    request: &'static str,
}

/// Create a linked completer/deferred pair. `request` names the request kind
/// in logs and in [`GlassError::Unresolved`].
pub fn pair<T>(request: &'static str) -> (Completer<T>, Deferred<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Pending),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Arc::clone(&slot),
            request,
            done: false,
        },
        Deferred { slot, request },
    )
}

impl<T> Completer<T> {
    /// Complete the slot. Returns `false` if it was already completed, in
    /// which case `result` is discarded.
    pub fn complete(&mut self, result: Result<T>) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        self.slot.resolve(result)
    }

    pub fn succeed(&mut self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&mut self, err: impl Into<GlassError>) -> bool {
        self.complete(Err(err.into()))
    }

    pub fn is_completed(&self) -> bool {
        self.done
    }

    /// True once the consumer dropped its half; completing is still allowed.
    pub fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.slot) == 1
    }

    pub fn request(&self) -> &'static str {
        self.request
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        error!(request = self.request, "request dropped without completion");
        self.slot.resolve(Err(GlassError::Unresolved {
            request: self.request,
        }));
    }
}

impl<T> Deferred<T> {
    /// A deferred that is already resolved with `result`.
    pub fn resolved(request: &'static str, result: Result<T>) -> Self {
        let (mut completer, deferred) = pair(request);
        completer.complete(result);
        deferred
    }

    pub fn request(&self) -> &'static str {
        self.request
    }

    /// True when a result is waiting to be taken.
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.state.lock(), SlotState::Ready(_))
    }

    /// Take the result if it has arrived. Yields `Some` exactly once.
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut state = self.slot.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Block until the result arrives. Must not be called from the thread
    /// that is expected to complete the request.
    pub fn wait(self) -> Result<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Ready(result) => return result,
                SlotState::Taken => {
                    return Err(GlassError::Unresolved {
                        request: self.request,
                    })
                }
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    self.slot.ready.wait(&mut state);
                }
            }
        }
    }

    /// Like [`Deferred::wait`] but gives the handle back on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Self> {
        {
            let mut state = self.slot.state.lock();
            if matches!(*state, SlotState::Pending) {
                self.slot.ready.wait_for(&mut state, timeout);
            }
            if let SlotState::Ready(_) = *state {
                if let SlotState::Ready(result) = std::mem::replace(&mut *state, SlotState::Taken) {
                    return Ok(result);
                }
            }
        }
        Err(self)
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.slot.state.lock() {
            SlotState::Pending => "pending",
            SlotState::Ready(_) => "ready",
            SlotState::Taken => "taken",
        };
        f.debug_struct("Deferred")
            .field("request", &self.request)
            .field("state", &state)
            .finish()
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("request", &self.request)
            .field("done", &self.done)
            .finish()
    }
}
