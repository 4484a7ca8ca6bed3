//! The pluggable check strategy driven by the guard loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::AbortPolicy;
use crate::domain::ChaosError;

/// One detected violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// Checker kind that detected it (`slo`, `policy`, `blast_radius`).
    pub checker: String,
    /// Experiment or run id being monitored.
    pub subject_id: String,
    pub detected_at: DateTime<Utc>,
    pub summary: String,
    /// Specific differences, breached metrics or exceeded limits.
    pub details: Vec<String>,
    /// State the observation was compared against, when there is one.
    pub baseline: Option<serde_json::Value>,
    pub observed: serde_json::Value,
}

impl ViolationRecord {
    pub fn new(checker: &str, subject_id: &str, details: Vec<String>) -> Self {
        Self {
            checker: checker.to_string(),
            subject_id: subject_id.to_string(),
            detected_at: Utc::now(),
            summary: details.join("; "),
            details,
            baseline: None,
            observed: serde_json::Value::Null,
        }
    }

    pub fn with_baseline(mut self, baseline: serde_json::Value) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn with_observed(mut self, observed: serde_json::Value) -> Self {
        self.observed = observed;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Clear,
    Violated(Vec<ViolationRecord>),
}

impl CheckOutcome {
    pub fn violated(record: ViolationRecord) -> Self {
        CheckOutcome::Violated(vec![record])
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, CheckOutcome::Clear)
    }
}

/// Baseline capture plus a periodic compare step.
///
/// `capture_baseline` happens before the guarded operation starts and
/// `teardown` after both the operation and the monitor have stopped.
#[async_trait]
pub trait Checker: Send + Sync {
    fn kind(&self) -> &str;

    fn subject_id(&self) -> &str;

    /// `false` when there is nothing to monitor; the loop is then skipped.
    fn has_targets(&self) -> bool;

    async fn capture_baseline(&self) -> Result<(), ChaosError>;

    async fn check(&self) -> Result<CheckOutcome, ChaosError>;

    /// Drop every piece of per-subject state. Must not fail.
    fn teardown(&self);

    /// Abort policy for violations reported under `checker`, when it differs
    /// from the guard's own.
    fn abort_policy_for(&self, _checker: &str) -> Option<AbortPolicy> {
        None
    }

    /// Whether violations reported under `checker` are alerted, when that
    /// differs from the guard's own setting.
    fn alert_for(&self, _checker: &str) -> Option<bool> {
        None
    }
}
