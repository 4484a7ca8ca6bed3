//! SLO violation log with severity classification and windowed abort advice.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::guard::AbortPolicy;

/// When in the experiment lifecycle the SLO was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Already breached before the fault was injected.
    BaselineBreach,
    RuntimeBreach,
    /// Still breached after recovery.
    RecoveryFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn for_kind(kind: ViolationKind) -> Self {
        match kind {
            ViolationKind::BaselineBreach => Severity::Critical,
            ViolationKind::RecoveryFailure => Severity::High,
            ViolationKind::RuntimeBreach => Severity::Medium,
        }
    }
}

/// Advise an abort once `max_violations` were recorded within `window_ms`.
///
/// The window only shapes [`ViolationResponse`]: severity, `should_abort`
/// and the recommended actions attached to SLO violation details. Whether a
/// run is actually aborted is decided by each guard's own
/// [`AbortPolicy`]; use [`ViolationWindow::abort_policy`] to make a guard
/// abort on the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViolationWindow {
    pub max_violations: usize,
    pub window_ms: u64,
}

impl ViolationWindow {
    /// The guard abort policy matching this window.
    pub fn abort_policy(&self) -> AbortPolicy {
        AbortPolicy::AfterRepeated {
            count: self.max_violations,
            window_ms: self.window_ms,
        }
    }
}

impl Default for ViolationWindow {
    fn default() -> Self {
        Self {
            max_violations: 3,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloViolation {
    pub id: String,
    pub experiment_id: String,
    pub kind: ViolationKind,
    pub detected_at: DateTime<Utc>,
    pub slo_results: BTreeMap<String, serde_json::Value>,
}

/// What the log advises after a violation was recorded.
///
/// Advisory only; nothing here aborts or alerts on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationResponse {
    pub severity: Severity,
    pub should_abort: bool,
    pub should_alert: bool,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationStats {
    pub total: usize,
    pub baseline_breaches: usize,
    pub runtime_breaches: usize,
    pub recovery_failures: usize,
    pub first_violation: Option<DateTime<Utc>>,
    pub last_violation: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Entry {
    violation: SloViolation,
    at: Instant,
}

/// Per-experiment history of SLO violations.
#[derive(Debug, Default)]
pub struct SloViolationLog {
    window: ViolationWindow,
    history: Mutex<HashMap<String, Vec<Entry>>>,
}

impl SloViolationLog {
    pub fn new(window: ViolationWindow) -> Self {
        Self {
            window,
            history: Mutex::new(HashMap::new()),
        }
    }

    fn history(&self) -> MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a violation and return the advised response.
    pub fn record(
        &self,
        experiment_id: &str,
        kind: ViolationKind,
        slo_results: BTreeMap<String, serde_json::Value>,
    ) -> ViolationResponse {
        let violation = SloViolation {
            id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.to_string(),
            kind,
            detected_at: Utc::now(),
            slo_results,
        };
        self.history()
            .entry(experiment_id.to_string())
            .or_default()
            .push(Entry {
                violation,
                at: Instant::now(),
            });

        let severity = Severity::for_kind(kind);
        let should_abort = self.should_abort(experiment_id);
        ViolationResponse {
            severity,
            should_abort,
            should_alert: severity >= Severity::High,
            recommended_actions: recommended_actions(kind, should_abort),
        }
    }

    /// Whether enough violations fell inside the window to warrant an abort.
    pub fn should_abort(&self, experiment_id: &str) -> bool {
        let window = Duration::from_millis(self.window.window_ms);
        let now = Instant::now();
        let recent = self
            .history()
            .get(experiment_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| now.duration_since(e.at) < window)
                    .count()
            })
            .unwrap_or(0);
        recent > 0 && recent >= self.window.max_violations
    }

    pub fn history_for(&self, experiment_id: &str) -> Vec<SloViolation> {
        self.history()
            .get(experiment_id)
            .map(|entries| entries.iter().map(|e| e.violation.clone()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, experiment_id: &str) -> ViolationStats {
        let history = self.history();
        let Some(entries) = history.get(experiment_id) else {
            return ViolationStats::default();
        };
        let count = |kind| entries.iter().filter(|e| e.violation.kind == kind).count();
        ViolationStats {
            total: entries.len(),
            baseline_breaches: count(ViolationKind::BaselineBreach),
            runtime_breaches: count(ViolationKind::RuntimeBreach),
            recovery_failures: count(ViolationKind::RecoveryFailure),
            first_violation: entries.first().map(|e| e.violation.detected_at),
            last_violation: entries.last().map(|e| e.violation.detected_at),
        }
    }

    pub fn is_tracking(&self, experiment_id: &str) -> bool {
        self.history().contains_key(experiment_id)
    }

    pub fn clear_experiment(&self, experiment_id: &str) {
        self.history().remove(experiment_id);
    }
}

fn recommended_actions(kind: ViolationKind, should_abort: bool) -> Vec<String> {
    let mut actions = Vec::new();
    if should_abort {
        actions.extend(["ABORT_EXPERIMENT", "NOTIFY_ON_CALL_ENGINEER"]);
    }
    match kind {
        ViolationKind::BaselineBreach => {
            actions.extend(["INVESTIGATE_SYSTEM_HEALTH", "DELAY_EXPERIMENT"]);
        }
        ViolationKind::RuntimeBreach => {
            actions.extend(["INCREASE_MONITORING_FREQUENCY", "PREPARE_ROLLBACK"]);
        }
        ViolationKind::RecoveryFailure => {
            actions.extend([
                "TRIGGER_REMEDIATION",
                "SCALE_UP_RESOURCES",
                "CREATE_INCIDENT_TICKET",
            ]);
        }
    }
    actions.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_by_kind() {
        let log = SloViolationLog::default();
        let r = log.record("e", ViolationKind::BaselineBreach, BTreeMap::new());
        assert_eq!(r.severity, Severity::Critical);
        assert!(r.should_alert);
        assert_eq!(
            r.recommended_actions,
            ["INVESTIGATE_SYSTEM_HEALTH", "DELAY_EXPERIMENT"]
        );

        let r = log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new());
        assert_eq!(r.severity, Severity::Medium);
        assert!(!r.should_alert);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_three_within_window() {
        let log = SloViolationLog::new(ViolationWindow::default());
        assert!(!log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new()).should_abort);
        assert!(!log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new()).should_abort);
        let third = log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new());
        assert!(third.should_abort);
        assert_eq!(third.recommended_actions[0], "ABORT_EXPERIMENT");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!log.should_abort("e"));
    }

    #[tokio::test(start_paused = true)]
    async fn old_violations_fall_out_of_window() {
        let log = SloViolationLog::new(ViolationWindow {
            max_violations: 2,
            window_ms: 1_000,
        });
        log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new());
        tokio::time::advance(Duration::from_millis(1_500)).await;
        let r = log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new());
        assert!(!r.should_abort);
    }

    #[tokio::test(start_paused = true)]
    async fn window_and_matching_guard_policy_agree() {
        let window = ViolationWindow {
            max_violations: 2,
            window_ms: 30_000,
        };
        assert_eq!(
            window.abort_policy(),
            AbortPolicy::AfterRepeated {
                count: 2,
                window_ms: 30_000
            }
        );

        let log = SloViolationLog::new(window);
        assert!(!log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new()).should_abort);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new()).should_abort);
    }

    #[test]
    fn stats_and_clear() {
        let log = SloViolationLog::default();
        log.record("e", ViolationKind::RuntimeBreach, BTreeMap::new());
        log.record("e", ViolationKind::RecoveryFailure, BTreeMap::new());

        let stats = log.stats("e");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.runtime_breaches, 1);
        assert_eq!(stats.recovery_failures, 1);
        assert!(stats.first_violation <= stats.last_violation);

        log.clear_experiment("e");
        assert!(!log.is_tracking("e"));
        assert_eq!(log.stats("e"), ViolationStats::default());
    }
}
