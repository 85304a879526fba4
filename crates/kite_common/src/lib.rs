//! Shared foundation for the Kite transaction-manager runtime.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod signal;

pub use error::{KiteError, KiteResult};
