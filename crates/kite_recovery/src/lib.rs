//! In-doubt transaction recovery for the Kite runtime.
//!
//! An in-doubt record marks a transaction whose outcome could not be durably
//! completed. Records live in a persistent store (pluggable via
//! [`store::RecoveryStore`]); the [`ledger::RecoveryLedger`] re-scans them on
//! a fixed period, re-attempting resolution, and exposes the suspend/resume
//! controls the suspension coordinator drives during graceful shutdown.

pub mod ledger;
pub mod store;

pub use ledger::{PassOutcome, RecoveryLedger, ScanStats};
pub use store::{InDoubtId, MemoryRecoveryStore, RecoveryStore};
