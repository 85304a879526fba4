//! Process lifecycle notification.
//!
//! The host process owns an explicit state machine (starting → running →
//! suspending/stopping → stopped) and publishes each transition to registered
//! listeners. The suspension coordinator listens for the running confirmation
//! to decide when deferred recovery-scan restarts may proceed.
//!
//! All transitions and listener registration are serialized through one
//! mutex, so a listener never observes transitions out of order.

use std::sync::Arc;

use parking_lot::Mutex;

/// Coarse process lifecycle state as published by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Suspending,
    Stopping,
    Stopped,
}

impl ProcessState {
    /// True for states in which the process is fully in service and
    /// background recovery work is safe to run.
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "STARTING"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Suspending => write!(f, "SUSPENDING"),
            ProcessState::Stopping => write!(f, "STOPPING"),
            ProcessState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Receives process state transitions.
pub trait ProcessStateListener: Send + Sync {
    fn on_process_state(&self, new_state: ProcessState);
}

struct NotifierInner {
    state: ProcessState,
    listeners: Vec<Arc<dyn ProcessStateListener>>,
}

/// Publishes process state transitions to registered listeners.
///
/// Owned by the host process; components register listeners at wiring time.
pub struct ProcessLifecycleNotifier {
    inner: Mutex<NotifierInner>,
}

impl ProcessLifecycleNotifier {
    /// Create a notifier in the `Starting` state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NotifierInner {
                state: ProcessState::Starting,
                listeners: Vec::new(),
            }),
        }
    }

    /// Register a listener. The current state is not replayed to it; the
    /// host wires listeners before publishing transitions.
    pub fn register(&self, listener: Arc<dyn ProcessStateListener>) {
        self.inner.lock().listeners.push(listener);
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    /// Transition to `new_state` and notify every listener. A repeated
    /// transition to the current state is a no-op.
    pub fn transition_to(&self, new_state: ProcessState) {
        // Snapshot listeners under the lock, notify outside it so a listener
        // may call back into lifecycle queries without deadlocking. The outer
        // host serializes transitions, so ordering is preserved.
        let listeners: Vec<Arc<dyn ProcessStateListener>> = {
            let mut inner = self.inner.lock();
            if inner.state == new_state {
                return;
            }
            let old = inner.state;
            inner.state = new_state;
            tracing::info!(%old, new = %new_state, "process state transition");
            inner.listeners.clone()
        };
        for listener in listeners {
            listener.on_process_state(new_state);
        }
    }
}

impl Default for ProcessLifecycleNotifier {
    fn default() -> Self {
        Self::new()
    }
}
