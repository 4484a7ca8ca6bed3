//! Structured observability hooks for run and guard lifecycle events.
//!
//! Events are emitted at `info!` level unless noted; filter with `RUST_LOG`.
//! For JSON output, initialise tracing with `init_tracing(true, ..)`.

use tracing::{debug, info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // every event emitted here carries run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("chaosgate.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: run handed to the fault agent.
pub fn emit_run_dispatched(run_id: &str, experiment: &str, fault: &str, dry_run: bool) {
    info!(
        event = "run.dispatched",
        run_id = %run_id,
        experiment = %experiment,
        fault = %fault,
        dry_run = dry_run,
    );
}

/// Emit event: hand-off to the agent failed (warning level).
pub fn emit_run_dispatch_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.dispatch_failed", run_id = %run_id, error = %error);
}

/// Emit event: agent progress update applied to a run.
pub fn emit_run_agent_update(run_id: &str, status: &str) {
    info!(event = "run.agent_update", run_id = %run_id, status = %status);
}

/// Emit event: update for a run that is not active (debug level).
pub fn emit_run_update_ignored(run_id: &str, status: &str) {
    debug!(event = "run.update_ignored", run_id = %run_id, status = %status);
}

/// Emit event: final SLO check forced the outcome to FAILED.
pub fn emit_run_outcome_overridden(run_id: &str, reported: &str, reason: &str) {
    warn!(
        event = "run.outcome_overridden",
        run_id = %run_id,
        reported = %reported,
        reason = %reason,
    );
}

/// Emit event: run finalized with its outcome.
pub fn emit_run_finalized(run_id: &str, outcome: &str, breach_detected: bool, duration_ms: u64) {
    info!(
        event = "run.finalized",
        run_id = %run_id,
        outcome = %outcome,
        breach_detected = breach_detected,
        duration_ms = duration_ms,
    );
}

/// Emit event: guard loop started for a subject.
pub fn emit_guard_started(kind: &str, subject_id: &str, interval_ms: u64, max_duration_ms: u64) {
    info!(
        event = "guard.started",
        kind = %kind,
        subject_id = %subject_id,
        interval_ms = interval_ms,
        max_duration_ms = max_duration_ms,
    );
}

/// Emit event: one check tick (debug level).
pub fn emit_guard_check(kind: &str, subject_id: &str, seq: u64, clear: bool) {
    debug!(
        event = "guard.check",
        kind = %kind,
        subject_id = %subject_id,
        seq = seq,
        clear = clear,
    );
}

/// Emit event: a check found a violation (warning level).
pub fn emit_guard_violation(kind: &str, subject_id: &str, summary: &str) {
    warn!(
        event = "guard.violation",
        kind = %kind,
        subject_id = %subject_id,
        summary = %summary,
    );
}

/// Emit event: guard loop finished.
pub fn emit_guard_finished(
    kind: &str,
    subject_id: &str,
    checks: u64,
    violations: u64,
    aborted: bool,
) {
    info!(
        event = "guard.finished",
        kind = %kind,
        subject_id = %subject_id,
        checks = checks,
        violations = violations,
        aborted = aborted,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_run_agent_update("test-run-id", "INJECTING");
    }
}
