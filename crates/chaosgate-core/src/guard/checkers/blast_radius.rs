//! Blast-radius checker: keeps the set of affected resources within limits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ChaosError;
use crate::guard::{CheckOutcome, Checker, ViolationRecord};
use crate::services::{BlastRadiusLimits, BlastRadiusService};

/// A resource touched by a running experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AffectedResource {
    Pod { name: String, namespace: String },
    Namespace { name: String },
    Service { name: String },
}

/// Reports which resources an experiment currently affects.
#[async_trait]
pub trait ResourceDiscovery: Send + Sync {
    async fn discover(&self, subject_id: &str) -> Result<Vec<AffectedResource>, ChaosError>;
}

pub struct BlastRadiusChecker {
    subject_id: String,
    limits: BlastRadiusLimits,
    service: Arc<BlastRadiusService>,
    discovery: Option<Arc<dyn ResourceDiscovery>>,
}

impl BlastRadiusChecker {
    /// Without discovery the checker validates whatever other components
    /// record on `service` for this subject.
    pub fn new(
        subject_id: impl Into<String>,
        limits: BlastRadiusLimits,
        service: Arc<BlastRadiusService>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            limits,
            service,
            discovery: None,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ResourceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    fn record(&self, resource: &AffectedResource) {
        let id = &self.subject_id;
        match resource {
            AffectedResource::Pod { name, namespace } => {
                self.service.record_affected_pod(id, name, namespace)
            }
            AffectedResource::Namespace { name } => {
                self.service.record_affected_namespace(id, name)
            }
            AffectedResource::Service { name } => self.service.record_affected_service(id, name),
        }
    }
}

#[async_trait]
impl Checker for BlastRadiusChecker {
    fn kind(&self) -> &str {
        "blast_radius"
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn has_targets(&self) -> bool {
        true
    }

    async fn capture_baseline(&self) -> Result<(), ChaosError> {
        self.service.initialize_tracking(&self.subject_id);
        Ok(())
    }

    async fn check(&self) -> Result<CheckOutcome, ChaosError> {
        if let Some(discovery) = &self.discovery {
            for resource in discovery.discover(&self.subject_id).await? {
                self.record(&resource);
            }
        }

        let result = self
            .service
            .validate_blast_radius(&self.subject_id, &self.limits);
        if result.valid {
            return Ok(CheckOutcome::Clear);
        }

        let mut record = ViolationRecord::new("blast_radius", &self.subject_id, result.violations)
            .with_baseline(serde_json::to_value(self.limits)?);
        if let Some(state) = self.service.current_state(&self.subject_id) {
            record = record.with_observed(serde_json::to_value(&state)?);
        }
        Ok(CheckOutcome::violated(record))
    }

    fn teardown(&self) {
        self.service.clear_experiment(&self.subject_id);
    }
}
