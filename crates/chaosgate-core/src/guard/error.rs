//! Error types for guarded calls.

use super::runner::GuardStats;
use super::ViolationRecord;
use crate::domain::ChaosError;

/// Errors produced by a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The monitor aborted the call; any operation result was discarded.
    #[error("{kind} guard aborted {subject_id} after {} violation(s)", violations.len())]
    Violation {
        kind: String,
        subject_id: String,
        violations: Vec<ViolationRecord>,
        stats: GuardStats,
    },

    /// The operation itself failed and no abort was raised.
    #[error("guarded operation failed: {0}")]
    Operation(E),

    /// Baseline capture failed; the operation was not started.
    #[error("baseline capture failed: {0}")]
    Baseline(ChaosError),
}

impl<E> GuardError<E> {
    pub fn violations(&self) -> &[ViolationRecord] {
        match self {
            GuardError::Violation { violations, .. } => violations,
            _ => &[],
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, GuardError::Violation { .. })
    }
}
