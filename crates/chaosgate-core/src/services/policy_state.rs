//! Policy snapshots and drift detection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::ValidationResult;
use crate::domain::SloTarget;

/// Immutable capture of the SLO targets enforced for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    pub snapshot_id: String,
    pub experiment_id: String,
    pub slos: Vec<SloTarget>,
    pub captured_at: DateTime<Utc>,
    /// SHA-256 over metric, threshold and comparator of every target, in order.
    pub policy_hash: String,
}

impl PolicyState {
    pub fn capture(experiment_id: &str, slos: &[SloTarget]) -> Self {
        Self {
            snapshot_id: Uuid::new_v4().to_string(),
            experiment_id: experiment_id.to_string(),
            slos: slos.to_vec(),
            captured_at: Utc::now(),
            policy_hash: policy_hash(slos),
        }
    }

    /// Structural equality; the hash rejects most changes without a deep compare.
    pub fn matches(&self, other: &PolicyState) -> bool {
        if self.policy_hash != other.policy_hash || self.slos.len() != other.slos.len() {
            return false;
        }
        self.slos
            .iter()
            .zip(&other.slos)
            .all(|(a, b)| same_constraint(a, b))
    }

    /// Field-level differences from `self` to `other`.
    pub fn differences(&self, other: &PolicyState) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.slos.len() != other.slos.len() {
            diffs.push(format!(
                "SLO count changed: {} -> {}",
                self.slos.len(),
                other.slos.len()
            ));
        }
        for (i, (a, b)) in self.slos.iter().zip(&other.slos).enumerate() {
            if a.metric != b.metric {
                diffs.push(format!("SLO[{i}] metric changed: {} -> {}", a.metric, b.metric));
            }
            if a.threshold.to_bits() != b.threshold.to_bits() {
                diffs.push(format!(
                    "SLO[{i}] threshold changed: {} -> {}",
                    a.threshold, b.threshold
                ));
            }
            if a.comparator != b.comparator {
                diffs.push(format!(
                    "SLO[{i}] comparator changed: {} -> {}",
                    a.comparator, b.comparator
                ));
            }
        }
        diffs
    }
}

fn same_constraint(a: &SloTarget, b: &SloTarget) -> bool {
    a.metric == b.metric
        && a.threshold.to_bits() == b.threshold.to_bits()
        && a.comparator == b.comparator
}

fn policy_hash(slos: &[SloTarget]) -> String {
    let mut hasher = Sha256::new();
    for slo in slos {
        hasher.update(slo.metric.as_bytes());
        hasher.update([0u8]);
        hasher.update(slo.threshold.to_bits().to_be_bytes());
        hasher.update(slo.comparator.as_bytes());
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

/// One detected policy drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub violation_id: String,
    pub experiment_id: String,
    pub original: PolicyState,
    pub changed: PolicyState,
    pub differences: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// Validation counters for one monitored experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMetrics {
    pub validations: u64,
    pub violations: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PolicyTables {
    snapshots: HashMap<String, PolicyState>,
    history: HashMap<String, Vec<PolicyViolation>>,
    metrics: HashMap<String, PolicyMetrics>,
}

/// Holds policy baselines and drift history per experiment.
#[derive(Debug, Default)]
pub struct PolicyStateService {
    tables: Mutex<PolicyTables>,
}

impl PolicyStateService {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, PolicyTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture the baseline for `experiment_id`, replacing any previous one.
    pub fn capture_snapshot(&self, experiment_id: &str, slos: &[SloTarget]) -> PolicyState {
        let snapshot = PolicyState::capture(experiment_id, slos);
        let mut t = self.tables();
        t.snapshots.insert(experiment_id.to_string(), snapshot.clone());
        t.metrics.insert(
            experiment_id.to_string(),
            PolicyMetrics {
                validations: 0,
                violations: 0,
                started_at: snapshot.captured_at,
            },
        );
        snapshot
    }

    /// Compare `current` against the captured baseline and record any drift.
    ///
    /// Without a baseline the result is invalid with a single explanation.
    pub fn validate_policy(
        &self,
        experiment_id: &str,
        current: &[SloTarget],
    ) -> ValidationResult {
        let mut t = self.tables();
        let Some(baseline) = t.snapshots.get(experiment_id).cloned() else {
            return ValidationResult::invalid(vec!["No policy snapshot found".to_string()]);
        };

        let current_state = PolicyState::capture(experiment_id, current);
        if let Some(m) = t.metrics.get_mut(experiment_id) {
            m.validations += 1;
        }
        if baseline.matches(&current_state) {
            return ValidationResult::valid();
        }

        let differences = baseline.differences(&current_state);
        t.history
            .entry(experiment_id.to_string())
            .or_default()
            .push(PolicyViolation {
                violation_id: Uuid::new_v4().to_string(),
                experiment_id: experiment_id.to_string(),
                original: baseline,
                changed: current_state,
                differences: differences.clone(),
                detected_at: Utc::now(),
            });
        if let Some(m) = t.metrics.get_mut(experiment_id) {
            m.violations += 1;
        }
        ValidationResult::invalid(differences)
    }

    pub fn has_policy_changed(&self, experiment_id: &str, current: &[SloTarget]) -> bool {
        !self.validate_policy(experiment_id, current).valid
    }

    pub fn snapshot(&self, experiment_id: &str) -> Option<PolicyState> {
        self.tables().snapshots.get(experiment_id).cloned()
    }

    pub fn violation_history(&self, experiment_id: &str) -> Vec<PolicyViolation> {
        self.tables()
            .history
            .get(experiment_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn metrics(&self, experiment_id: &str) -> Option<PolicyMetrics> {
        self.tables().metrics.get(experiment_id).cloned()
    }

    /// Ids with a live baseline, sorted.
    pub fn active_experiments(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.tables().snapshots.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear_experiment(&self, experiment_id: &str) {
        let mut t = self.tables();
        t.snapshots.remove(experiment_id);
        t.history.remove(experiment_id);
        t.metrics.remove(experiment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slos() -> Vec<SloTarget> {
        vec![
            SloTarget::new("latency_p95", "q1", 500.0, "<"),
            SloTarget::new("error_rate", "q2", 0.01, "<="),
        ]
    }

    #[test]
    fn identical_policies_match() {
        let a = PolicyState::capture("e", &slos());
        let b = PolicyState::capture("e", &slos());
        assert_ne!(a.snapshot_id, b.snapshot_id);
        assert_eq!(a.policy_hash, b.policy_hash);
        assert!(a.matches(&b));
        assert!(a.differences(&b).is_empty());
    }

    #[test]
    fn differences_are_field_level() {
        let a = PolicyState::capture("e", &slos());
        let mut changed = slos();
        changed[0].threshold = 800.0;
        changed[1].comparator = "<".into();
        changed.push(SloTarget::new("cpu", "q3", 0.9, "<"));
        let b = PolicyState::capture("e", &changed);

        assert!(!a.matches(&b));
        assert_eq!(
            a.differences(&b),
            [
                "SLO count changed: 2 -> 3",
                "SLO[0] threshold changed: 500 -> 800",
                "SLO[1] comparator changed: <= -> <",
            ]
        );
    }

    #[test]
    fn service_records_drift_and_clears() {
        let svc = PolicyStateService::new();
        svc.capture_snapshot("exp", &slos());
        assert!(svc.validate_policy("exp", &slos()).valid);

        let mut changed = slos();
        changed[0].metric = "latency_p99".into();
        let result = svc.validate_policy("exp", &changed);
        assert!(!result.valid);
        assert_eq!(
            result.violations,
            ["SLO[0] metric changed: latency_p95 -> latency_p99"]
        );

        let metrics = svc.metrics("exp").unwrap();
        assert_eq!(metrics.validations, 2);
        assert_eq!(metrics.violations, 1);
        assert_eq!(svc.violation_history("exp").len(), 1);
        assert_eq!(svc.active_experiments(), ["exp"]);

        svc.clear_experiment("exp");
        assert!(svc.snapshot("exp").is_none());
        assert!(svc.violation_history("exp").is_empty());
        assert!(svc.active_experiments().is_empty());
    }

    #[test]
    fn validate_without_snapshot_is_invalid() {
        let svc = PolicyStateService::new();
        let result = svc.validate_policy("missing", &slos());
        assert!(!result.valid);
        assert_eq!(result.violations, ["No policy snapshot found"]);
    }
}
