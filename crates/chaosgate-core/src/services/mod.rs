//! Per-experiment state services used by the guard checkers.
//!
//! Each service is an in-memory, lock-protected map keyed by experiment id.
//! Every public method may be called from the guarded operation and from
//! the monitor task at the same time.

pub mod blast_radius;
pub mod policy_state;
pub mod violations;

use serde::{Deserialize, Serialize};

pub use blast_radius::{
    BlastRadiusBreach, BlastRadiusLimits, BlastRadiusService, BlastRadiusState,
};
pub use policy_state::{PolicyMetrics, PolicyState, PolicyStateService, PolicyViolation};
pub use violations::{
    Severity, SloViolation, SloViolationLog, ViolationKind, ViolationResponse, ViolationStats,
    ViolationWindow,
};

/// Outcome of validating current state against a baseline or limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Specific differences or exceeded limits; empty when valid.
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
        }
    }

    pub fn invalid(violations: Vec<String>) -> Self {
        Self {
            valid: false,
            violations,
        }
    }
}
