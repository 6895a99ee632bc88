//! Reference-counted readiness gate.
//!
//! Callers register outstanding units of asynchronous work with
//! [`ReadinessBarrier::add`] and retire them with
//! [`ReadinessBarrier::done`]. The completion callback runs exactly once,
//! synchronously on the caller of the `done` that brings the count back
//! to zero. There is no blocking wait.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

type Completion = Box<dyn FnOnce() + Send>;

struct BarrierState {
    outstanding: usize,
    fired: bool,
    completion: Option<Completion>,
}

/// A join primitive firing once all registered work has completed.
///
/// Not re-armable: once the callback has fired, further `add` and `done`
/// calls are misuse and are logged and ignored.
pub struct ReadinessBarrier {
    state: Mutex<BarrierState>,
}

impl ReadinessBarrier {
    /// Create a barrier with no outstanding work.
    pub fn new<F>(on_ready: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            state: Mutex::new(BarrierState {
                outstanding: 0,
                fired: false,
                completion: Some(Box::new(on_ready)),
            }),
        }
    }

    /// Register `delta` more units of outstanding work.
    pub fn add(&self, delta: usize) {
        let mut state = self.lock();
        if state.fired {
            warn!(delta, "barrier already fired, ignoring add");
            return;
        }
        if delta == 0 {
            warn!("ignoring add of zero units");
            return;
        }
        state.outstanding = state.outstanding.saturating_add(delta);
        debug!(outstanding = state.outstanding, "barrier work added");
    }

    /// Retire one unit of work, firing the completion callback when the
    /// count reaches zero.
    pub fn done(&self) {
        let completion = {
            let mut state = self.lock();
            if state.fired {
                warn!("barrier already fired, ignoring done");
                return;
            }
            let Some(remaining) = state.outstanding.checked_sub(1) else {
                warn!("done called without outstanding work, ignoring");
                return;
            };
            state.outstanding = remaining;
            debug!(outstanding = remaining, "barrier work retired");
            if remaining > 0 {
                return;
            }
            state.fired = true;
            state.completion.take()
        };

        // Run outside the lock so the callback may inspect the barrier.
        if let Some(completion) = completion {
            debug!("barrier reached zero, running completion");
            completion();
        }
    }

    /// Number of units still outstanding.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Whether the completion callback has fired.
    pub fn is_ready(&self) -> bool {
        self.lock().fired
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl core::fmt::Debug for ReadinessBarrier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("ReadinessBarrier")
            .field("outstanding", &state.outstanding)
            .field("fired", &state.fired)
            .finish()
    }
}
