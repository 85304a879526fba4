//! Interruptible wait signal for drain and scan loops.
//!
//! Both long-lived loops in this runtime — the recovery scan ticker and the
//! coordinator's drain poll — sleep for multi-second intervals between
//! iterations. A bare `thread::sleep` would make suspend cancellation and
//! scan shutdown wait out the full interval; `WakeSignal` is a Condvar-backed
//! wait that wakes within milliseconds of `raise()`.
//!
//! Unlike a one-shot shutdown flag, the signal can be re-armed with
//! `reset()`: the coordinator cycles through suspend/resume indefinitely and
//! re-uses one signal per cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A cooperative, re-armable wake signal.
///
/// Clones share state. `raise()` wakes every thread blocked in `wait_for()`
/// immediately; `reset()` re-arms the signal for the next cycle.
#[derive(Clone)]
pub struct WakeSignal {
    inner: Arc<WakeInner>,
}

struct WakeInner {
    raised: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WakeSignal {
    /// Create a new signal in the armed (not raised) state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(WakeInner {
                raised: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Raise the signal. Wakes all waiters immediately.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        // Take the mutex so a waiter between its raised-check and its wait
        // cannot miss the notification.
        let _guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.condvar.notify_all();
    }

    /// Check whether the signal has been raised (non-blocking).
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Re-arm the signal for the next cycle. Any waiter that raced the reset
    /// observes the raised state it was woken for; new waits block again.
    pub fn reset(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    /// Sleep for at most `duration`, waking immediately if `raise()` is
    /// called. Returns `true` if the signal was raised.
    pub fn wait_for(&self, duration: Duration) -> bool {
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_raised() {
            return true;
        }
        let (_guard, _timeout) = self
            .inner
            .condvar
            .wait_timeout(guard, duration)
            .unwrap_or_else(|e| e.into_inner());
        self.is_raised()
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}
