//! Admission rules consulted before an experiment is created.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{ExperimentDefinition, FaultKind};

/// Yes/no gate on experiment definitions.
pub trait AdmissionPolicy: Send + Sync {
    fn is_allowed(&self, definition: &ExperimentDefinition) -> bool;

    /// Why `definition` is denied, or an informational note for an allowed
    /// definition that needs extra approval. `None` when there is nothing
    /// to say.
    fn denial_reason(&self, definition: &ExperimentDefinition) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionRules {
    pub allowed_namespaces: BTreeSet<String>,
    pub allowed_clusters: BTreeSet<String>,
    pub max_duration_secs: u64,
    pub min_slos: usize,
    /// Allowed, but flagged as needing approval.
    pub restricted_faults: Vec<FaultKind>,
}

impl Default for AdmissionRules {
    fn default() -> Self {
        let set = |items: &[&str]| -> BTreeSet<String> {
            items.iter().map(|s| s.to_string()).collect()
        };
        Self {
            allowed_namespaces: set(&["default", "staging", "test", "dev"]),
            allowed_clusters: set(&["production-cluster", "staging-cluster", "dev-cluster"]),
            max_duration_secs: 1_800,
            min_slos: 1,
            restricted_faults: vec![FaultKind::NetworkPartition],
        }
    }
}

/// [`AdmissionPolicy`] backed by [`AdmissionRules`].
///
/// Rules are checked in order (namespace, cluster, duration, SLO count)
/// and the first failing one is reported.
#[derive(Debug, Clone, Default)]
pub struct RuleAdmission {
    rules: AdmissionRules,
}

impl RuleAdmission {
    pub fn new(rules: AdmissionRules) -> Self {
        Self { rules }
    }

    fn first_violation(&self, def: &ExperimentDefinition) -> Option<String> {
        let rules = &self.rules;
        if !rules.allowed_namespaces.contains(&def.target.namespace) {
            return Some(format!(
                "Invalid namespace: '{}'. Allowed namespaces: {}",
                def.target.namespace,
                join(&rules.allowed_namespaces)
            ));
        }
        if !rules.allowed_clusters.contains(&def.target.cluster) {
            return Some(format!(
                "Invalid cluster: '{}'. Allowed clusters: {}",
                def.target.cluster,
                join(&rules.allowed_clusters)
            ));
        }
        if def.timeout_secs == 0 || def.timeout_secs > rules.max_duration_secs {
            return Some(format!(
                "Experiment duration out of range: {} seconds (max: {} seconds)",
                def.timeout_secs, rules.max_duration_secs
            ));
        }
        if def.slos.len() < rules.min_slos {
            return Some(format!(
                "Insufficient SLO definitions: {} (minimum required: {})",
                def.slos.len(),
                rules.min_slos
            ));
        }
        None
    }
}

impl AdmissionPolicy for RuleAdmission {
    fn is_allowed(&self, definition: &ExperimentDefinition) -> bool {
        self.first_violation(definition).is_none()
    }

    fn denial_reason(&self, definition: &ExperimentDefinition) -> Option<String> {
        self.first_violation(definition).or_else(|| {
            self.rules
                .restricted_faults
                .contains(&definition.fault)
                .then(|| {
                    format!(
                        "Fault type '{}' requires approval before execution",
                        definition.fault
                    )
                })
        })
    }
}

fn join(items: &BTreeSet<String>) -> String {
    items.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
