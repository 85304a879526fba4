use thiserror::Error;

/// Convenience alias for `Result<T, KiteError>`.
pub type KiteResult<T> = Result<T, KiteError>;

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum KiteError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transaction error: {0}")]
    Txn(#[from] TxnError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Suspend error: {0}")]
    Suspend(#[from] SuspendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. Always fatal at startup — a coordinator is never
/// built from an invalid config.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("recovery period must be >= 1 second (got {0})")]
    InvalidRecoveryPeriod(u64),

    #[error("recovery backoff must be >= 1 second (got {0})")]
    InvalidRecoveryBackoff(u64),

    #[error("recovery backoff ({backoff}s) must not exceed the scan period ({period}s)")]
    BackoffExceedsPeriod { backoff: u64, period: u64 },

    #[error("default transaction timeout must be >= 1 second (got {0})")]
    InvalidDefaultTimeout(u64),
}

/// Transaction registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxnError {
    /// The gate is closed: the process is draining or suspended and no new
    /// transactional work is accepted.
    #[error("transaction creation is suspended")]
    CreationSuspended,

    #[error("transaction {0} not found")]
    NotFound(u64),
}

/// Recovery ledger / store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// The backing in-doubt log could not be read. Propagated to any
    /// in-progress suspend sequence — never masked by a stale count.
    #[error("recovery store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Suspend-sequencing errors surfaced to the shutdown orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuspendError {
    /// The drain was aborted by a concurrent resume. Not a failure of the
    /// drain itself; the caller re-runs its resume path.
    #[error("drain cancelled by resume")]
    Cancelled,

    /// The transaction inventory could not report counts. The suspend
    /// sequence is aborted and the gate stays closed (fail-closed).
    #[error("transaction inventory unavailable: {0}")]
    Inventory(String),

    /// The recovery ledger could not report counts. Same fail-closed
    /// handling as inventory failures.
    #[error("recovery ledger unavailable: {0}")]
    Ledger(String),

    /// `await_drained` was called while no suspend sequence was in flight.
    #[error("no suspend in progress (state is {0})")]
    NotSuspending(&'static str),
}

impl From<RecoveryError> for SuspendError {
    fn from(e: RecoveryError) -> Self {
        SuspendError::Ledger(e.to_string())
    }
}
