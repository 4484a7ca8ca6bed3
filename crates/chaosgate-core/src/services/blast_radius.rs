//! Blast-radius tracking: the set of resources an experiment has affected.
//!
//! Unlike a policy snapshot the tracked state grows while the experiment
//! runs; validation checks its size per resource kind against limits.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ValidationResult;

/// Maximum number of distinct resources of each kind an experiment may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlastRadiusLimits {
    pub max_pods: usize,
    pub max_namespaces: usize,
    pub max_services: usize,
}

impl Default for BlastRadiusLimits {
    fn default() -> Self {
        Self {
            max_pods: 3,
            max_namespaces: 1,
            max_services: 1,
        }
    }
}

/// Resources affected by one experiment so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadiusState {
    pub experiment_id: String,
    pub started_at: DateTime<Utc>,
    pub pods: BTreeSet<String>,
    pub namespaces: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

impl BlastRadiusState {
    pub fn new(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            started_at: Utc::now(),
            pods: BTreeSet::new(),
            namespaces: BTreeSet::new(),
            services: BTreeSet::new(),
        }
    }

    pub fn has_affected_resources(&self) -> bool {
        !(self.pods.is_empty() && self.namespaces.is_empty() && self.services.is_empty())
    }

    pub fn exceeds(&self, limits: &BlastRadiusLimits) -> bool {
        self.pods.len() > limits.max_pods
            || self.namespaces.len() > limits.max_namespaces
            || self.services.len() > limits.max_services
    }

    /// One line per exceeded kind, e.g. `Pods: 4 > 3 (limit)`.
    pub fn breaches(&self, limits: &BlastRadiusLimits) -> Vec<String> {
        [
            ("Pods", self.pods.len(), limits.max_pods),
            ("Namespaces", self.namespaces.len(), limits.max_namespaces),
            ("Services", self.services.len(), limits.max_services),
        ]
        .into_iter()
        .filter(|(_, count, max)| count > max)
        .map(|(kind, count, max)| format!("{kind}: {count} > {max} (limit)"))
        .collect()
    }
}

/// A recorded limit breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadiusBreach {
    pub experiment_id: String,
    pub detected_at: DateTime<Utc>,
    pub affected_pods: usize,
    pub affected_namespaces: usize,
    pub affected_services: usize,
    pub details: Vec<String>,
}

#[derive(Debug)]
struct Tracked {
    state: BlastRadiusState,
    breaches: Vec<BlastRadiusBreach>,
}

/// Tracks affected resources per experiment.
#[derive(Debug, Default)]
pub struct BlastRadiusService {
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl BlastRadiusService {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking with an empty resource set, discarding earlier state.
    pub fn initialize_tracking(&self, experiment_id: &str) -> BlastRadiusState {
        let state = BlastRadiusState::new(experiment_id);
        self.tracked().insert(
            experiment_id.to_string(),
            Tracked {
                state: state.clone(),
                breaches: Vec::new(),
            },
        );
        state
    }

    pub fn is_tracking(&self, experiment_id: &str) -> bool {
        self.tracked().contains_key(experiment_id)
    }

    pub fn current_state(&self, experiment_id: &str) -> Option<BlastRadiusState> {
        self.tracked().get(experiment_id).map(|t| t.state.clone())
    }

    /// Record an affected pod and its namespace. Ignored when not tracking.
    pub fn record_affected_pod(&self, experiment_id: &str, pod: &str, namespace: &str) {
        if let Some(t) = self.tracked().get_mut(experiment_id) {
            t.state.pods.insert(pod.to_string());
            t.state.namespaces.insert(namespace.to_string());
        }
    }

    pub fn record_affected_namespace(&self, experiment_id: &str, namespace: &str) {
        if let Some(t) = self.tracked().get_mut(experiment_id) {
            t.state.namespaces.insert(namespace.to_string());
        }
    }

    pub fn record_affected_service(&self, experiment_id: &str, service: &str) {
        if let Some(t) = self.tracked().get_mut(experiment_id) {
            t.state.services.insert(service.to_string());
        }
    }

    /// Check the tracked set against `limits`, recording a breach if exceeded.
    ///
    /// An experiment that is not tracked is valid.
    pub fn validate_blast_radius(
        &self,
        experiment_id: &str,
        limits: &BlastRadiusLimits,
    ) -> ValidationResult {
        let mut tracked = self.tracked();
        let Some(t) = tracked.get_mut(experiment_id) else {
            return ValidationResult::valid();
        };
        if !t.state.exceeds(limits) {
            return ValidationResult::valid();
        }
        let details = t.state.breaches(limits);
        t.breaches.push(BlastRadiusBreach {
            experiment_id: experiment_id.to_string(),
            detected_at: Utc::now(),
            affected_pods: t.state.pods.len(),
            affected_namespaces: t.state.namespaces.len(),
            affected_services: t.state.services.len(),
            details: details.clone(),
        });
        ValidationResult::invalid(details)
    }

    pub fn breach_history(&self, experiment_id: &str) -> Vec<BlastRadiusBreach> {
        self.tracked()
            .get(experiment_id)
            .map(|t| t.breaches.clone())
            .unwrap_or_default()
    }

    pub fn clear_experiment(&self, experiment_id: &str) {
        self.tracked().remove(experiment_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_limits_is_valid() {
        let svc = BlastRadiusService::new();
        svc.initialize_tracking("exp");
        svc.record_affected_pod("exp", "cart-1", "default");
        svc.record_affected_service("exp", "cart");

        let result = svc.validate_blast_radius("exp", &BlastRadiusLimits::default());
        assert!(result.valid);
        assert!(svc.breach_history("exp").is_empty());
    }

    #[test]
    fn spread_beyond_limits_is_reported_per_kind() {
        let svc = BlastRadiusService::new();
        svc.initialize_tracking("exp");
        for i in 1..=4 {
            svc.record_affected_pod("exp", &format!("cart-{i}"), "default");
        }
        svc.record_affected_pod("exp", "cart-1", "default");
        svc.record_affected_namespace("exp", "staging");
        svc.record_affected_service("exp", "cart");

        let result = svc.validate_blast_radius("exp", &BlastRadiusLimits::default());
        assert!(!result.valid);
        assert_eq!(
            result.violations,
            ["Pods: 4 > 3 (limit)", "Namespaces: 2 > 1 (limit)"]
        );

        let history = svc.breach_history("exp");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].affected_pods, 4);
    }

    #[test]
    fn untracked_experiments_ignore_records() {
        let svc = BlastRadiusService::new();
        svc.record_affected_pod("ghost", "p", "ns");
        assert!(svc.current_state("ghost").is_none());
        assert!(
            svc.validate_blast_radius("ghost", &BlastRadiusLimits::default())
                .valid
        );
    }

    #[test]
    fn clear_removes_state() {
        let svc = BlastRadiusService::new();
        svc.initialize_tracking("exp");
        assert!(svc.is_tracking("exp"));
        svc.clear_experiment("exp");
        assert!(!svc.is_tracking("exp"));
    }
}
