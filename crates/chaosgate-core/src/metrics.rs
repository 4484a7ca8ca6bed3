//! Atomic counters for ChaosGate observability.
//!
//! Each orchestrator or guard owns (or shares) a [`Metrics`] instance; there
//! is no process-wide registry, so independent instances never see each
//! other's counts. Call [`Metrics::flush`] to emit the current values as a
//! single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free run and guard counters.
#[derive(Debug, Default)]
pub struct Metrics {
    runs_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    agent_updates: AtomicU64,
    runs_finalized: AtomicU64,
    outcomes_overridden: AtomicU64,
    guard_checks: AtomicU64,
    guard_violations: AtomicU64,
    guard_aborts: AtomicU64,
}

macro_rules! counter {
    ($field:ident, $inc:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $field(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            agent_updates: AtomicU64::new(0),
            runs_finalized: AtomicU64::new(0),
            outcomes_overridden: AtomicU64::new(0),
            guard_checks: AtomicU64::new(0),
            guard_violations: AtomicU64::new(0),
            guard_aborts: AtomicU64::new(0),
        }
    }

    counter!(runs_dispatched, inc_runs_dispatched);
    counter!(dispatch_failures, inc_dispatch_failures);
    counter!(agent_updates, inc_agent_updates);
    counter!(runs_finalized, inc_runs_finalized);
    counter!(outcomes_overridden, inc_outcomes_overridden);
    counter!(guard_checks, inc_guard_checks);
    counter!(guard_violations, inc_guard_violations);
    counter!(guard_aborts, inc_guard_aborts);

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call at natural boundaries (end of a run, process exit) rather than on
    /// every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_dispatched = self.runs_dispatched(),
            dispatch_failures = self.dispatch_failures(),
            agent_updates = self.agent_updates(),
            runs_finalized = self.runs_finalized(),
            outcomes_overridden = self.outcomes_overridden(),
            guard_checks = self.guard_checks(),
            guard_violations = self.guard_violations(),
            guard_aborts = self.guard_aborts(),
        );
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for c in [
            &self.runs_dispatched,
            &self.dispatch_failures,
            &self.agent_updates,
            &self.runs_finalized,
            &self.outcomes_overridden,
            &self.guard_checks,
            &self.guard_violations,
            &self.guard_aborts,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
