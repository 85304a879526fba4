//! Drain-then-suspend / confirm-then-resume coordination.
//!
//! The coordinator owns exactly one piece of state — the process-wide
//! [`SuspensionState`] — and orchestrates three collaborators behind traits:
//! the transaction gate, the active-transaction inventory, and the recovery
//! ledger's scan controls. Traits keep the coordinator testable against
//! deterministic fakes instead of a live transaction manager.
//!
//! # Invariants
//! - The gate is closed in `Draining` and `Suspended`, open only in
//!   `Running`. No transaction may begin after `pre_suspend()` returns.
//! - `await_drained()` completes only when the active count and the
//!   in-doubt count are both zero on the same observation. There is no
//!   global lock preventing a new in-doubt record from appearing between
//!   the two reads; the loop tolerates extra iterations rather than
//!   deadlocking.
//! - Recovery scanning is restarted only once the process lifecycle has
//!   confirmed a running state; an earlier `resume()` defers the restart to
//!   the lifecycle notification.
//!
//! # Failure semantics
//! A count read failure aborts the suspend sequence with the gate left
//! closed (fail-closed): re-opening the gate after a suspend began would
//! accept work the process is trying to shed. A drain that never converges
//! is not an error — it blocks, logging warnings, until an operator deletes
//! the stuck in-doubt record.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use kite_common::config::RecoveryPolicy;
use kite_common::error::SuspendError;
use kite_common::lifecycle::{ProcessState, ProcessStateListener};
use kite_common::signal::WakeSignal;

/// Read access to the active-transaction population.
///
/// Implementations must be snapshot reads, safe to call concurrently with
/// transaction begin/complete on other threads.
pub trait TxnInventory: Send + Sync {
    /// Number of transactions begun but not yet finished.
    fn active_count(&self) -> Result<usize, SuspendError>;

    /// Largest configured timeout among active transactions, or `None` when
    /// there are none.
    fn max_timeout_secs(&self) -> Result<Option<u32>, SuspendError>;
}

/// On/off switch for new transaction creation. Both operations are
/// idempotent and must not block.
pub trait TxnGate: Send + Sync {
    fn disable(&self);
    fn enable(&self);
}

/// The recovery ledger as seen by the coordinator: an in-doubt count that is
/// re-read every drain iteration, and scan-loop pause/restart controls.
pub trait RecoveryControl: Send + Sync {
    /// Number of in-doubt records currently persisted.
    fn left_over_count(&self) -> Result<usize, SuspendError>;

    /// Stop the periodic scan loop. Known records are kept.
    fn suspend_scanning(&self);

    /// (Re)start the periodic scan loop. Idempotent.
    fn resume_scanning(&self);
}

/// Process-wide suspension state. Exactly one instance, owned by the
/// coordinator; all transitions are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionState {
    Running,
    Draining,
    Suspended,
}

impl SuspensionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspensionState::Running => "RUNNING",
            SuspensionState::Draining => "DRAINING",
            SuspensionState::Suspended => "SUSPENDED",
        }
    }
}

impl std::fmt::Display for SuspensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability snapshot of an in-progress (or finished) drain.
#[derive(Debug, Clone, Default)]
pub struct DrainProgress {
    /// Poll iterations that found outstanding work and waited.
    pub iterations: u64,
    /// Active-transaction count at the last observation.
    pub last_active: usize,
    /// In-doubt count at the last observation.
    pub last_left_over: usize,
}

/// Wait before re-checking while active transactions remain.
///
/// Uses the largest in-flight timeout so no transaction is judged stuck
/// before it has had its full allotted time, floored at the recovery
/// backoff period.
pub fn drain_wait(max_timeout_secs: Option<u32>, policy: &RecoveryPolicy) -> Duration {
    match max_timeout_secs {
        Some(secs) => std::cmp::max(Duration::from_secs(u64::from(secs)), policy.backoff()),
        None => policy.backoff(),
    }
}

/// Coordinates graceful suspension of the transaction subsystem.
pub struct SuspensionCoordinator {
    inventory: Arc<dyn TxnInventory>,
    gate: Arc<dyn TxnGate>,
    recovery: Arc<dyn RecoveryControl>,
    policy: RecoveryPolicy,
    state: Mutex<SuspensionState>,
    /// Set by `pre_suspend`, cleared by `resume`; guards `await_drained`
    /// against running outside a suspend sequence.
    suspend_requested: AtomicBool,
    /// Last lifecycle confirmation: true once the process reported running.
    lifecycle_running: AtomicBool,
    /// Raised by `resume` to interrupt a pending drain wait.
    cancel: WakeSignal,
    iterations: AtomicU64,
    last_active: AtomicUsize,
    last_left_over: AtomicUsize,
}

impl SuspensionCoordinator {
    pub fn new(
        inventory: Arc<dyn TxnInventory>,
        gate: Arc<dyn TxnGate>,
        recovery: Arc<dyn RecoveryControl>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            inventory,
            gate,
            recovery,
            policy,
            state: Mutex::new(SuspensionState::Running),
            suspend_requested: AtomicBool::new(false),
            lifecycle_running: AtomicBool::new(false),
            cancel: WakeSignal::new(),
            iterations: AtomicU64::new(0),
            last_active: AtomicUsize::new(0),
            last_left_over: AtomicUsize::new(0),
        }
    }

    /// Current suspension state.
    pub fn state(&self) -> SuspensionState {
        *self.state.lock()
    }

    /// Drain progress snapshot for operator state queries.
    pub fn progress(&self) -> DrainProgress {
        DrainProgress {
            iterations: self.iterations.load(Ordering::Relaxed),
            last_active: self.last_active.load(Ordering::Relaxed),
            last_left_over: self.last_left_over.load(Ordering::Relaxed),
        }
    }

    /// First phase of a suspend request: stop accepting new transactional
    /// work. Bounded and non-blocking, so the caller's suspend sequencing of
    /// other subsystems is not stalled.
    pub fn pre_suspend(&self) -> Result<(), SuspendError> {
        self.cancel.reset();
        self.suspend_requested.store(true, Ordering::SeqCst);
        self.gate.disable();
        tracing::info!("transaction gate closed, suspend sequence started");
        Ok(())
    }

    /// Second phase: block until in-flight and in-doubt work has drained to
    /// zero, then pause recovery scanning and declare `Suspended`.
    ///
    /// Runs on a dedicated worker thread — it may block for minutes (or, with
    /// a stuck in-doubt record, until an operator deletes it). A concurrent
    /// `resume()` interrupts any pending wait and returns
    /// `Err(SuspendError::Cancelled)`.
    pub fn await_drained(&self) -> Result<(), SuspendError> {
        if !self.suspend_requested.load(Ordering::SeqCst) {
            return Err(SuspendError::NotSuspending(self.state().as_str()));
        }
        *self.state.lock() = SuspensionState::Draining;
        self.iterations.store(0, Ordering::Relaxed);

        loop {
            if self.cancel.is_raised() {
                return Err(SuspendError::Cancelled);
            }

            // Counts are advisory snapshots, re-read every iteration. A read
            // failure aborts the sequence with the gate left closed.
            let left_over = self.recovery.left_over_count().map_err(|e| {
                tracing::error!(error = %e, "drain aborted: cannot read in-doubt count");
                e
            })?;
            let active = self.inventory.active_count().map_err(|e| {
                tracing::error!(error = %e, "drain aborted: cannot read active count");
                e
            })?;
            self.last_active.store(active, Ordering::Relaxed);
            self.last_left_over.store(left_over, Ordering::Relaxed);

            if active == 0 && left_over == 0 {
                break;
            }
            self.iterations.fetch_add(1, Ordering::Relaxed);

            let wait = if active > 0 {
                let wait = drain_wait(self.inventory.max_timeout_secs()?, &self.policy);
                tracing::warn!(
                    active,
                    wait_ms = wait.as_millis() as u64,
                    "in-flight transactions must complete before suspension"
                );
                wait
            } else {
                let wait = self.policy.backoff();
                tracing::warn!(
                    left_over,
                    wait_ms = wait.as_millis() as u64,
                    "in-doubt transactions must be resolved (or deleted by an \
                     administrator) before suspension"
                );
                wait
            };
            if self.cancel.wait_for(wait) {
                return Err(SuspendError::Cancelled);
            }
        }

        // A resume may have raced the final observation; the state lock
        // serializes against it so scanning is never paused after a resume
        // already restarted it.
        let mut state = self.state.lock();
        if self.cancel.is_raised() {
            return Err(SuspendError::Cancelled);
        }
        self.recovery.suspend_scanning();
        *state = SuspensionState::Suspended;
        tracing::info!("transaction subsystem drained and suspended");
        Ok(())
    }

    /// Re-open the gate and return to `Running`. Recovery scanning restarts
    /// immediately if the lifecycle has already confirmed a running process;
    /// otherwise the restart is deferred to the running notification.
    pub fn resume(&self) {
        let confirmed = {
            let mut state = self.state.lock();
            let was = *state;
            *state = SuspensionState::Running;
            self.suspend_requested.store(false, Ordering::SeqCst);
            self.gate.enable();
            self.cancel.raise();
            let confirmed = self.lifecycle_running.load(Ordering::SeqCst);
            tracing::info!(was = %was, deferred = !confirmed, "resume requested, gate reopened");
            confirmed
        };
        if confirmed {
            self.recovery.resume_scanning();
        }
    }
}

impl ProcessStateListener for SuspensionCoordinator {
    /// Restart recovery scanning when the process confirms a running state,
    /// unless the subsystem is (still) suspended. This decouples
    /// "administrative resume requested" from "process actually capable of
    /// running recovery work".
    fn on_process_state(&self, new_state: ProcessState) {
        let running = new_state.is_running();
        self.lifecycle_running.store(running, Ordering::SeqCst);
        if !running {
            return;
        }
        let suspended = *self.state.lock() == SuspensionState::Suspended;
        if !suspended {
            tracing::info!("process confirmed running, recovery scanning resumed");
            self.recovery.resume_scanning();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct FakeInventory {
        active: AtomicUsize,
        max_timeout_secs: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeInventory {
        fn new(active: usize) -> Arc<Self> {
            Arc::new(Self {
                active: AtomicUsize::new(active),
                max_timeout_secs: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl TxnInventory for FakeInventory {
        fn active_count(&self) -> Result<usize, SuspendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SuspendError::Inventory("injected".into()));
            }
            Ok(self.active.load(Ordering::SeqCst))
        }

        fn max_timeout_secs(&self) -> Result<Option<u32>, SuspendError> {
            let active = self.active.load(Ordering::SeqCst);
            if active == 0 {
                return Ok(None);
            }
            Ok(Some(self.max_timeout_secs.load(Ordering::SeqCst) as u32))
        }
    }

    struct FakeGate {
        open: AtomicBool,
    }

    impl FakeGate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: AtomicBool::new(true),
            })
        }
    }

    impl TxnGate for FakeGate {
        fn disable(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn enable(&self) {
            self.open.store(true, Ordering::SeqCst);
        }
    }

    struct FakeRecovery {
        left_over: AtomicUsize,
        suspend_calls: AtomicUsize,
        resume_calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeRecovery {
        fn new(left_over: usize) -> Arc<Self> {
            Arc::new(Self {
                left_over: AtomicUsize::new(left_over),
                suspend_calls: AtomicUsize::new(0),
                resume_calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    impl RecoveryControl for FakeRecovery {
        fn left_over_count(&self) -> Result<usize, SuspendError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SuspendError::Ledger("injected".into()));
            }
            Ok(self.left_over.load(Ordering::SeqCst))
        }

        fn suspend_scanning(&self) {
            self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn resume_scanning(&self) {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_policy() -> RecoveryPolicy {
        RecoveryPolicy::new(Duration::from_millis(100), Duration::from_millis(50))
    }

    fn setup(
        active: usize,
        left_over: usize,
    ) -> (
        Arc<FakeInventory>,
        Arc<FakeGate>,
        Arc<FakeRecovery>,
        Arc<SuspensionCoordinator>,
    ) {
        let inventory = FakeInventory::new(active);
        let gate = FakeGate::new();
        let recovery = FakeRecovery::new(left_over);
        let coord = Arc::new(SuspensionCoordinator::new(
            inventory.clone(),
            gate.clone(),
            recovery.clone(),
            fast_policy(),
        ));
        (inventory, gate, recovery, coord)
    }

    // ── drain_wait ──

    #[test]
    fn test_drain_wait_uses_max_active_timeout() {
        // Active timeouts {5s, 20s}, backoff 1s: wait the full 20s.
        let policy = RecoveryPolicy::new(Duration::from_secs(120), Duration::from_secs(1));
        assert_eq!(drain_wait(Some(20), &policy), Duration::from_secs(20));
    }

    #[test]
    fn test_drain_wait_floored_at_backoff() {
        let policy = RecoveryPolicy::new(Duration::from_secs(120), Duration::from_secs(10));
        assert_eq!(drain_wait(Some(5), &policy), Duration::from_secs(10));
        assert_eq!(drain_wait(None, &policy), Duration::from_secs(10));
    }

    // ── state machine basics ──

    #[test]
    fn test_initial_state_running() {
        let (_, _, _, coord) = setup(0, 0);
        assert_eq!(coord.state(), SuspensionState::Running);
    }

    #[test]
    fn test_pre_suspend_closes_gate() {
        let (_, gate, _, coord) = setup(0, 0);
        coord.pre_suspend().unwrap();
        assert!(!gate.open.load(Ordering::SeqCst));
    }

    #[test]
    fn test_await_drained_without_pre_suspend_rejected() {
        let (_, _, recovery, coord) = setup(0, 0);
        let err = coord.await_drained().unwrap_err();
        assert!(matches!(err, SuspendError::NotSuspending(_)));
        assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drained_subsystem_suspends_immediately() {
        let (_, _, recovery, coord) = setup(0, 0);
        coord.pre_suspend().unwrap();
        let start = Instant::now();
        coord.await_drained().unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(coord.state(), SuspensionState::Suspended);
        assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resume_reopens_gate_and_returns_to_running() {
        let (_, gate, _, coord) = setup(0, 0);
        coord.pre_suspend().unwrap();
        coord.await_drained().unwrap();
        coord.resume();
        assert_eq!(coord.state(), SuspensionState::Running);
        assert!(gate.open.load(Ordering::SeqCst));
    }

    // ── drain convergence ──

    #[test]
    fn test_drain_waits_for_active_transactions() {
        let (inventory, _, _, coord) = setup(2, 0);
        coord.pre_suspend().unwrap();

        let coord2 = coord.clone();
        let handle = std::thread::spawn(move || coord2.await_drained());

        std::thread::sleep(Duration::from_millis(120));
        assert!(!handle.is_finished(), "drain must block while work is active");
        assert_eq!(coord.state(), SuspensionState::Draining);
        assert!(coord.progress().iterations >= 1);

        inventory.active.store(0, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
        assert_eq!(coord.state(), SuspensionState::Suspended);
    }

    #[test]
    fn test_stuck_in_doubt_record_blocks_until_deleted() {
        let (_, _, recovery, coord) = setup(0, 1);
        coord.pre_suspend().unwrap();

        let coord2 = coord.clone();
        let handle = std::thread::spawn(move || coord2.await_drained());

        // Still blocked after three backoff intervals.
        std::thread::sleep(Duration::from_millis(170));
        assert!(!handle.is_finished(), "drain must block on in-doubt records");
        assert_eq!(coord.progress().last_left_over, 1);

        // Administrative delete: drain completes within one interval.
        recovery.left_over.store(0, Ordering::SeqCst);
        let start = Instant::now();
        handle.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drain_requires_both_counts_zero_on_same_observation() {
        let (inventory, _, recovery, coord) = setup(1, 1);
        coord.pre_suspend().unwrap();

        let coord2 = coord.clone();
        let handle = std::thread::spawn(move || coord2.await_drained());

        // Clearing only one count must not complete the drain.
        inventory.active.store(0, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(120));
        assert!(!handle.is_finished());

        recovery.left_over.store(0, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }

    // ── cancellation ──

    #[test]
    fn test_resume_cancels_pending_drain() {
        let (_, gate, recovery, coord) = setup(0, 1);
        coord.pre_suspend().unwrap();

        let coord2 = coord.clone();
        let handle = std::thread::spawn(move || coord2.await_drained());
        std::thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        coord.resume();
        let result = handle.join().unwrap();
        assert_eq!(result, Err(SuspendError::Cancelled));
        assert!(
            start.elapsed() < Duration::from_millis(100),
            "cancel must interrupt the pending wait"
        );
        assert_eq!(coord.state(), SuspensionState::Running);
        assert!(gate.open.load(Ordering::SeqCst));
        // Scanning was never paused, so nothing to suspend.
        assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), 0);
    }

    // ── failure semantics ──

    #[test]
    fn test_ledger_read_failure_fails_closed() {
        let (_, gate, recovery, coord) = setup(0, 0);
        recovery.fail.store(true, Ordering::SeqCst);
        coord.pre_suspend().unwrap();

        let err = coord.await_drained().unwrap_err();
        assert!(matches!(err, SuspendError::Ledger(_)));
        // Gate stays closed and scanning untouched until an operator acts.
        assert!(!gate.open.load(Ordering::SeqCst));
        assert_eq!(coord.state(), SuspensionState::Draining);
        assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_inventory_read_failure_fails_closed() {
        let (inventory, gate, _, coord) = setup(0, 0);
        inventory.fail.store(true, Ordering::SeqCst);
        coord.pre_suspend().unwrap();

        let err = coord.await_drained().unwrap_err();
        assert!(matches!(err, SuspendError::Inventory(_)));
        assert!(!gate.open.load(Ordering::SeqCst));
    }

    // ── deferred resume ──

    #[test]
    fn test_resume_defers_scan_restart_until_running_confirmation() {
        let (_, _, recovery, coord) = setup(0, 0);
        coord.pre_suspend().unwrap();
        coord.await_drained().unwrap();

        // Lifecycle has never confirmed running: resume must defer.
        coord.resume();
        assert_eq!(recovery.resume_calls.load(Ordering::SeqCst), 0);

        coord.on_process_state(ProcessState::Starting);
        assert_eq!(recovery.resume_calls.load(Ordering::SeqCst), 0);

        coord.on_process_state(ProcessState::Running);
        assert_eq!(recovery.resume_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resume_restarts_scanning_when_lifecycle_already_running() {
        let (_, _, recovery, coord) = setup(0, 0);
        coord.on_process_state(ProcessState::Running);
        let baseline = recovery.resume_calls.load(Ordering::SeqCst);

        coord.pre_suspend().unwrap();
        coord.await_drained().unwrap();
        coord.resume();
        assert_eq!(recovery.resume_calls.load(Ordering::SeqCst), baseline + 1);
    }

    #[test]
    fn test_running_notification_while_suspended_does_not_restart_scanning() {
        let (_, _, recovery, coord) = setup(0, 0);
        coord.pre_suspend().unwrap();
        coord.await_drained().unwrap();

        coord.on_process_state(ProcessState::Running);
        assert_eq!(recovery.resume_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_suspend_resume_cycles_repeat() {
        let (_, gate, recovery, coord) = setup(0, 0);
        coord.on_process_state(ProcessState::Running);
        let baseline = recovery.resume_calls.load(Ordering::SeqCst);

        for cycle in 1..=3 {
            coord.pre_suspend().unwrap();
            coord.await_drained().unwrap();
            assert_eq!(coord.state(), SuspensionState::Suspended);
            coord.resume();
            assert_eq!(coord.state(), SuspensionState::Running);
            assert!(gate.open.load(Ordering::SeqCst));
            assert_eq!(recovery.suspend_calls.load(Ordering::SeqCst), cycle);
            assert_eq!(
                recovery.resume_calls.load(Ordering::SeqCst),
                baseline + cycle
            );
        }
    }
}
