//! Policy checker: detects drift of the enforced SLO set during a run.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::{ChaosError, SloTarget};
use crate::guard::{CheckOutcome, Checker, ViolationRecord};
use crate::services::PolicyStateService;
use crate::store::ExperimentRepository;

/// Where the currently enforced policy is read from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn current_policy(&self) -> Result<Vec<SloTarget>, ChaosError>;
}

/// Re-reads an experiment definition's SLOs from the repository.
pub struct RepositoryPolicySource {
    repo: Arc<dyn ExperimentRepository>,
    experiment_id: String,
}

impl RepositoryPolicySource {
    pub fn new(repo: Arc<dyn ExperimentRepository>, experiment_id: impl Into<String>) -> Self {
        Self {
            repo,
            experiment_id: experiment_id.into(),
        }
    }
}

#[async_trait]
impl PolicySource for RepositoryPolicySource {
    async fn current_policy(&self) -> Result<Vec<SloTarget>, ChaosError> {
        self.repo
            .find_definition(&self.experiment_id)
            .await?
            .map(|def| def.slos)
            .ok_or_else(|| ChaosError::NotFound(format!("experiment {}", self.experiment_id)))
    }
}

/// Policy held in memory and replaceable at runtime.
#[derive(Debug, Default)]
pub struct SharedPolicy {
    slos: RwLock<Vec<SloTarget>>,
}

impl SharedPolicy {
    pub fn new(slos: Vec<SloTarget>) -> Self {
        Self {
            slos: RwLock::new(slos),
        }
    }

    pub fn replace(&self, slos: Vec<SloTarget>) {
        *self.slos.write().unwrap_or_else(PoisonError::into_inner) = slos;
    }
}

#[async_trait]
impl PolicySource for SharedPolicy {
    async fn current_policy(&self) -> Result<Vec<SloTarget>, ChaosError> {
        Ok(self
            .slos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

pub struct PolicyChecker {
    subject_id: String,
    monitored: bool,
    source: Arc<dyn PolicySource>,
    service: Arc<PolicyStateService>,
}

impl PolicyChecker {
    /// `initial` is the policy the subject was created with; an empty
    /// policy leaves nothing to monitor.
    pub fn new(
        subject_id: impl Into<String>,
        initial: &[SloTarget],
        source: Arc<dyn PolicySource>,
        service: Arc<PolicyStateService>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            monitored: !initial.is_empty(),
            source,
            service,
        }
    }
}

#[async_trait]
impl Checker for PolicyChecker {
    fn kind(&self) -> &str {
        "policy"
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn has_targets(&self) -> bool {
        self.monitored
    }

    async fn capture_baseline(&self) -> Result<(), ChaosError> {
        let slos = self.source.current_policy().await?;
        let snapshot = self.service.capture_snapshot(&self.subject_id, &slos);
        tracing::debug!(
            subject_id = %self.subject_id,
            slos = snapshot.slos.len(),
            hash = %&snapshot.policy_hash[..12],
            "policy baseline captured"
        );
        Ok(())
    }

    async fn check(&self) -> Result<CheckOutcome, ChaosError> {
        let current = self.source.current_policy().await?;
        let result = self.service.validate_policy(&self.subject_id, &current);
        if result.valid {
            return Ok(CheckOutcome::Clear);
        }

        let baseline = self
            .service
            .snapshot(&self.subject_id)
            .map(|s| serde_json::to_value(&s.slos))
            .transpose()?;
        let mut record = ViolationRecord::new("policy", &self.subject_id, result.violations)
            .with_observed(serde_json::to_value(&current)?);
        if let Some(baseline) = baseline {
            record = record.with_baseline(baseline);
        }
        Ok(CheckOutcome::violated(record))
    }

    fn teardown(&self) {
        self.service.clear_experiment(&self.subject_id);
    }
}
