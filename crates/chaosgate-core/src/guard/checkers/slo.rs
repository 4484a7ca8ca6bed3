//! SLO checker: an absolute threshold check against live metrics every tick.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ChaosError, SloTarget};
use crate::guard::{CheckOutcome, Checker, ViolationRecord};
use crate::services::{SloViolationLog, ViolationKind};
use crate::slo::SloEvaluator;

pub struct SloChecker {
    subject_id: String,
    slos: Vec<SloTarget>,
    evaluator: SloEvaluator,
    log: Arc<SloViolationLog>,
}

impl SloChecker {
    pub fn new(
        subject_id: impl Into<String>,
        slos: Vec<SloTarget>,
        evaluator: SloEvaluator,
        log: Arc<SloViolationLog>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            slos,
            evaluator,
            log,
        }
    }
}

#[async_trait]
impl Checker for SloChecker {
    fn kind(&self) -> &str {
        "slo"
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn has_targets(&self) -> bool {
        !self.slos.is_empty()
    }

    async fn capture_baseline(&self) -> Result<(), ChaosError> {
        Ok(())
    }

    async fn check(&self) -> Result<CheckOutcome, ChaosError> {
        let evaluation = self.evaluator.evaluate(&self.slos).await;
        let breaches = evaluation.breach_details();
        if breaches.is_empty() {
            return Ok(CheckOutcome::Clear);
        }

        let results = evaluation.to_result_map();
        let response = self
            .log
            .record(&self.subject_id, ViolationKind::RuntimeBreach, results.clone());

        let mut details: Vec<String> = breaches.iter().map(|b| b.describe()).collect();
        details.push(format!("severity: {:?}", response.severity));
        if !response.recommended_actions.is_empty() {
            details.push(format!(
                "recommended: {}",
                response.recommended_actions.join(", ")
            ));
        }

        let mut record = ViolationRecord::new("slo", &self.subject_id, details)
            .with_observed(serde_json::to_value(&results)?);
        record.summary = breaches
            .iter()
            .map(|b| b.describe())
            .collect::<Vec<_>>()
            .join("; ");
        Ok(CheckOutcome::violated(record))
    }

    fn teardown(&self) {
        self.log.clear_experiment(&self.subject_id);
    }
}
