use std::collections::BTreeMap;

use parking_lot::RwLock;

use kite_common::error::RecoveryError;

/// Identifier of a persisted in-doubt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InDoubtId(pub u64);

impl std::fmt::Display for InDoubtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "indoubt-{}", self.0)
    }
}

/// The persistent in-doubt transaction log, as the ledger sees it.
///
/// The store is owned by the log-store subsystem; the ledger only counts,
/// re-probes, and re-attempts resolution. Records leave the store either
/// through a successful `try_resolve` pass or through the administrative
/// `remove` path.
pub trait RecoveryStore: Send + Sync {
    /// Current unresolved record ids, as a snapshot read.
    fn unresolved(&self) -> Result<Vec<InDoubtId>, RecoveryError>;

    /// Attempt to resolve one record. `Ok(true)` means the record completed
    /// and was removed; `Ok(false)` means it is still unresolved.
    fn try_resolve(&self, id: InDoubtId) -> Result<bool, RecoveryError>;

    /// Administrative delete. `Ok(true)` if the record existed.
    fn remove(&self, id: InDoubtId) -> Result<bool, RecoveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    /// Participants cannot complete yet; resolution attempts fail.
    Pending,
    /// The next resolution attempt will complete and remove the record.
    Resolvable,
}

/// In-memory `RecoveryStore` for embedding and tests.
///
/// Records start `Pending`; `mark_resolvable` simulates a participant
/// becoming able to complete, after which the next scan pass resolves the
/// record. `fail_reads` injects store outages to exercise the fail-closed
/// suspend path.
pub struct MemoryRecoveryStore {
    records: RwLock<BTreeMap<InDoubtId, RecordState>>,
    fail_reads: RwLock<bool>,
}

impl MemoryRecoveryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            fail_reads: RwLock::new(false),
        }
    }

    /// Persist a new in-doubt record (e.g. a commit that raised an
    /// unexpected participant failure).
    pub fn record(&self, id: InDoubtId) {
        self.records.write().insert(id, RecordState::Pending);
        tracing::warn!(%id, "in-doubt transaction recorded");
    }

    /// Allow the next resolution attempt for `id` to succeed.
    pub fn mark_resolvable(&self, id: InDoubtId) {
        if let Some(state) = self.records.write().get_mut(&id) {
            *state = RecordState::Resolvable;
        }
    }

    /// Simulate the store becoming unreadable (or readable again).
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.write() = fail;
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryRecoveryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryStore for MemoryRecoveryStore {
    fn unresolved(&self) -> Result<Vec<InDoubtId>, RecoveryError> {
        if *self.fail_reads.read() {
            return Err(RecoveryError::StoreUnavailable("injected outage".into()));
        }
        Ok(self.records.read().keys().copied().collect())
    }

    fn try_resolve(&self, id: InDoubtId) -> Result<bool, RecoveryError> {
        if *self.fail_reads.read() {
            return Err(RecoveryError::StoreUnavailable("injected outage".into()));
        }
        let mut records = self.records.write();
        match records.get(&id) {
            Some(RecordState::Resolvable) => {
                records.remove(&id);
                tracing::info!(%id, "in-doubt transaction resolved");
                Ok(true)
            }
            Some(RecordState::Pending) => Ok(false),
            None => Ok(true),
        }
    }

    fn remove(&self, id: InDoubtId) -> Result<bool, RecoveryError> {
        let existed = self.records.write().remove(&id).is_some();
        if existed {
            tracing::warn!(%id, "in-doubt transaction deleted by administrator");
        }
        Ok(existed)
    }
}
