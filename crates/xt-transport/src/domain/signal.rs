//! Stop signal shared between a worker loop and whoever interrupts it.
//!
//! Workers wait on it instead of sleeping blind, so an interrupt ends a
//! backoff delay or a sliced reply wait at once.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-way flag: once raised it stays raised.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter. Returns `true` for the first call.
    pub fn raise(&self) -> bool {
        let mut raised = self.raised.lock();
        let first = !*raised;
        *raised = true;
        drop(raised);
        self.cond.notify_all();
        first
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Block for up to `timeout`. Returns `true` if the signal was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}
