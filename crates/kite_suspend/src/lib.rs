//! Suspension coordinator for the Kite transaction runtime.
//!
//! Implements the drain-then-suspend / confirm-then-resume protocol: close
//! the transaction gate, wait for in-flight and in-doubt work to drain to
//! zero, pause recovery scanning, and restart it on resume only once the
//! process lifecycle confirms a running state.

pub mod coordinator;

pub use coordinator::{
    drain_wait, DrainProgress, RecoveryControl, SuspensionCoordinator, SuspensionState, TxnGate,
    TxnInventory,
};
