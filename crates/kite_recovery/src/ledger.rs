//! Periodic in-doubt recovery scanning.
//!
//! The ledger re-probes the recovery store on a fixed period, re-attempting
//! resolution of every unresolved record. The scan loop is a plain ticker —
//! no dynamic backoff growth. The configured backoff period acts as a floor:
//! after a pass that left records unresolved, no new resolution pass runs
//! for the same record set until the floor elapses.
//!
//! `suspend_scanning` stops the loop without touching the store; known
//! records stay persisted and are re-probed when scanning resumes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use kite_common::config::RecoveryPolicy;
use kite_common::error::{RecoveryError, SuspendError};
use kite_common::signal::WakeSignal;
use kite_suspend::RecoveryControl;

use crate::store::RecoveryStore;

/// Outcome of one scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Skipped: the previous failed pass is younger than the backoff floor.
    Skipped,
    /// A resolution pass ran.
    Completed { resolved: usize, remaining: usize },
}

/// Cumulative scan statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    /// Resolution passes executed (skipped passes not counted).
    pub passes_run: u64,
    /// Records resolved across all passes.
    pub records_resolved: u64,
    /// Unresolved count at the end of the last executed pass.
    pub last_unresolved: usize,
}

#[derive(Default)]
struct ScanCounters {
    passes_run: AtomicU64,
    records_resolved: AtomicU64,
    last_unresolved: AtomicUsize,
}

struct ScanTask {
    signal: WakeSignal,
    handle: std::thread::JoinHandle<()>,
}

/// Drives periodic recovery of in-doubt records.
pub struct RecoveryLedger {
    store: Arc<dyn RecoveryStore>,
    policy: RecoveryPolicy,
    counters: Arc<ScanCounters>,
    /// Instant of the last pass that left records unresolved.
    last_failed_pass: Arc<Mutex<Option<Instant>>>,
    scan: Mutex<Option<ScanTask>>,
}

impl RecoveryLedger {
    pub fn new(store: Arc<dyn RecoveryStore>, policy: RecoveryPolicy) -> Self {
        Self {
            store,
            policy,
            counters: Arc::new(ScanCounters::default()),
            last_failed_pass: Arc::new(Mutex::new(None)),
            scan: Mutex::new(None),
        }
    }

    /// Live snapshot of the unresolved record count. Never cached — the
    /// drain loop re-reads this every iteration, and a store outage must
    /// surface instead of being masked by a stale count.
    pub fn left_over_count(&self) -> Result<usize, RecoveryError> {
        Ok(self.store.unresolved()?.len())
    }

    /// Run one resolution pass over the current record set.
    pub fn scan_pass(&self) -> Result<PassOutcome, RecoveryError> {
        run_pass(
            &self.store,
            &self.policy,
            &self.counters,
            &self.last_failed_pass,
        )
    }

    /// Whether the background scan loop is currently running.
    pub fn is_scanning(&self) -> bool {
        self.scan.lock().is_some()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> ScanStats {
        ScanStats {
            passes_run: self.counters.passes_run.load(Ordering::Relaxed),
            records_resolved: self.counters.records_resolved.load(Ordering::Relaxed),
            last_unresolved: self.counters.last_unresolved.load(Ordering::Relaxed),
        }
    }

    /// Start (or restart) the periodic scan loop. Idempotent: a running
    /// loop is left alone.
    pub fn resume_scanning(&self) {
        let mut scan = self.scan.lock();
        if scan.is_some() {
            return;
        }

        let signal = WakeSignal::new();
        let signal_clone = signal.clone();
        let store = Arc::clone(&self.store);
        let policy = self.policy;
        let counters = Arc::clone(&self.counters);
        let last_failed = Arc::clone(&self.last_failed_pass);

        let spawned = std::thread::Builder::new()
            .name("kite-recovery-scan".into())
            .spawn(move || {
                tracing::info!(
                    period_ms = policy.period().as_millis() as u64,
                    backoff_ms = policy.backoff().as_millis() as u64,
                    "recovery scan loop started"
                );
                while !signal_clone.wait_for(policy.period()) {
                    match run_pass(&store, &policy, &counters, &last_failed) {
                        Ok(PassOutcome::Completed { resolved, remaining }) if remaining > 0 => {
                            tracing::warn!(resolved, remaining, "recovery pass left records unresolved");
                        }
                        Ok(PassOutcome::Completed { resolved, .. }) if resolved > 0 => {
                            tracing::info!(resolved, "recovery pass completed");
                        }
                        Ok(_) => {}
                        // The loop keeps ticking through outages; a drain in
                        // progress sees the same failure via its own probe.
                        Err(e) => tracing::warn!(error = %e, "recovery pass failed"),
                    }
                }
                tracing::info!("recovery scan loop stopped");
            });

        match spawned {
            Ok(handle) => *scan = Some(ScanTask { signal, handle }),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn recovery scan thread");
            }
        }
    }

    /// Stop the scan loop and wait for it to exit. Known records stay in
    /// the store untouched. Idempotent.
    pub fn suspend_scanning(&self) {
        let task = self.scan.lock().take();
        if let Some(task) = task {
            task.signal.raise();
            let _ = task.handle.join();
        }
    }
}

impl Drop for RecoveryLedger {
    fn drop(&mut self) {
        self.suspend_scanning();
    }
}

fn run_pass(
    store: &Arc<dyn RecoveryStore>,
    policy: &RecoveryPolicy,
    counters: &ScanCounters,
    last_failed_pass: &Mutex<Option<Instant>>,
) -> Result<PassOutcome, RecoveryError> {
    let ids = store.unresolved()?;
    if !ids.is_empty() {
        // Backoff floor: do not hammer participants that just failed.
        if let Some(last) = *last_failed_pass.lock() {
            if last.elapsed() < policy.backoff() {
                return Ok(PassOutcome::Skipped);
            }
        }
    }

    let mut resolved = 0;
    let mut remaining = 0;
    for id in ids {
        if store.try_resolve(id)? {
            resolved += 1;
        } else {
            remaining += 1;
        }
    }

    *last_failed_pass.lock() = if remaining > 0 {
        Some(Instant::now())
    } else {
        None
    };
    counters.passes_run.fetch_add(1, Ordering::Relaxed);
    counters
        .records_resolved
        .fetch_add(resolved as u64, Ordering::Relaxed);
    counters.last_unresolved.store(remaining, Ordering::Relaxed);

    Ok(PassOutcome::Completed {
        resolved,
        remaining,
    })
}

impl RecoveryControl for RecoveryLedger {
    fn left_over_count(&self) -> Result<usize, SuspendError> {
        RecoveryLedger::left_over_count(self).map_err(SuspendError::from)
    }

    fn suspend_scanning(&self) {
        RecoveryLedger::suspend_scanning(self);
    }

    fn resume_scanning(&self) {
        RecoveryLedger::resume_scanning(self);
    }
}
