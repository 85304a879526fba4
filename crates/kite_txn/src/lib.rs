//! Active-transaction registry for the Kite runtime.
//!
//! Tracks transactions between begin and completion, exposes the admission
//! gate the suspension coordinator closes during drain, and serves the
//! snapshot reads (`active_count`, `max_timeout_secs`) the drain loop polls.

pub mod registry;

pub use registry::{ActiveTxnInfo, TxnId, TxnRegistry};
