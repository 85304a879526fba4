use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use kite_common::config::TxnConfig;
use kite_common::error::{SuspendError, TxnError};
use kite_suspend::{TxnGate, TxnInventory};

/// Monotonic transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct ActiveTxn {
    begun_at: Instant,
    timeout_secs: u32,
}

/// Snapshot of one active transaction for operator inspection.
#[derive(Debug, Clone)]
pub struct ActiveTxnInfo {
    pub txn_id: TxnId,
    pub elapsed_secs: u64,
    pub timeout_secs: u32,
    /// Seconds until the transaction's allotted time elapses (0 if already
    /// past it).
    pub remaining_secs: u64,
}

/// Registry of transactions between begin and completion.
///
/// The registry does not own outcome semantics — commit, rollback, and
/// heuristic resolution all end in `complete()`. What it owns is admission:
/// while the gate is closed, `begin` fails fast and deterministically.
///
/// All reads are lock-free snapshots over a `DashMap`, safe concurrently
/// with begin/complete on other threads.
pub struct TxnRegistry {
    txn_counter: AtomicU64,
    active: DashMap<TxnId, ActiveTxn>,
    accepting: AtomicBool,
    default_timeout_secs: u32,
}

impl TxnRegistry {
    pub fn new(default_timeout_secs: u32) -> Self {
        Self {
            txn_counter: AtomicU64::new(1),
            active: DashMap::new(),
            accepting: AtomicBool::new(true),
            default_timeout_secs,
        }
    }

    pub fn from_config(config: &TxnConfig) -> Self {
        Self::new(config.default_timeout_secs as u32)
    }

    /// Begin a transaction with the registry's default timeout.
    pub fn begin(&self) -> Result<TxnId, TxnError> {
        self.begin_with_timeout(self.default_timeout_secs)
    }

    /// Begin a transaction with an explicit timeout.
    ///
    /// Fails fast with `TxnError::CreationSuspended` while the gate is
    /// closed. Hard invariant: once `disable()` has returned, no begin call
    /// succeeds until the next `enable()`.
    pub fn begin_with_timeout(&self, timeout_secs: u32) -> Result<TxnId, TxnError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(TxnError::CreationSuspended);
        }
        let txn_id = TxnId(self.txn_counter.fetch_add(1, Ordering::SeqCst));
        self.active.insert(
            txn_id,
            ActiveTxn {
                begun_at: Instant::now(),
                timeout_secs,
            },
        );
        tracing::debug!(%txn_id, timeout_secs, "txn begin");
        Ok(txn_id)
    }

    /// Remove a finished transaction (commit, rollback, or heuristic
    /// resolution — the registry does not distinguish).
    pub fn complete(&self, txn_id: TxnId) -> Result<(), TxnError> {
        match self.active.remove(&txn_id) {
            Some(_) => {
                tracing::debug!(%txn_id, "txn complete");
                Ok(())
            }
            None => Err(TxnError::NotFound(txn_id.0)),
        }
    }

    /// Number of transactions begun but not yet completed.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Largest configured timeout among active transactions.
    pub fn max_timeout_secs(&self) -> Option<u32> {
        self.active.iter().map(|e| e.value().timeout_secs).max()
    }

    /// True while new transactions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Close the gate. Idempotent; no effect on in-flight transactions.
    pub fn disable(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("transaction creation disabled");
        }
    }

    /// Re-open the gate. Idempotent.
    pub fn enable(&self) {
        if !self.accepting.swap(true, Ordering::SeqCst) {
            tracing::info!("transaction creation enabled");
        }
    }

    /// Per-transaction view for operator state queries.
    pub fn snapshot(&self) -> Vec<ActiveTxnInfo> {
        let mut infos: Vec<ActiveTxnInfo> = self
            .active
            .iter()
            .map(|e| {
                let elapsed = e.value().begun_at.elapsed().as_secs();
                let timeout = u64::from(e.value().timeout_secs);
                ActiveTxnInfo {
                    txn_id: *e.key(),
                    elapsed_secs: elapsed,
                    timeout_secs: e.value().timeout_secs,
                    remaining_secs: timeout.saturating_sub(elapsed),
                }
            })
            .collect();
        infos.sort_by_key(|i| i.txn_id);
        infos
    }
}

impl TxnInventory for TxnRegistry {
    fn active_count(&self) -> Result<usize, SuspendError> {
        Ok(TxnRegistry::active_count(self))
    }

    fn max_timeout_secs(&self) -> Result<Option<u32>, SuspendError> {
        Ok(TxnRegistry::max_timeout_secs(self))
    }
}

impl TxnGate for TxnRegistry {
    fn disable(&self) {
        TxnRegistry::disable(self);
    }

    fn enable(&self) {
        TxnRegistry::enable(self);
    }
}
