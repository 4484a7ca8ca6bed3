//! Control-plane facade: experiment CRUD, admission and run scheduling.

use std::sync::Arc;

use tracing::info;

use crate::admission::{AdmissionPolicy, RuleAdmission};
use crate::agent::FaultAgent;
use crate::config::ChaosGateConfig;
use crate::domain::{ChaosError, ExperimentDefinition, Report, Result, RunPlan, RunState};
use crate::guard::{
    AlertSink, BlastRadiusChecker, CompositeChecker, Guard, GuardConfig, PolicyChecker,
    RepositoryPolicySource, ResourceDiscovery, SloChecker, TracingAlertSink,
};
use crate::metric_source::MetricSource;
use crate::orchestrator::Orchestrator;
use crate::services::{BlastRadiusLimits, BlastRadiusService, PolicyStateService, SloViolationLog};
use crate::store::ExperimentRepository;

/// The SLO, policy and blast-radius guards applied to every monitored run.
pub struct RunGuards {
    pub slo: GuardConfig,
    pub policy: GuardConfig,
    pub blast: GuardConfig,
    pub limits: BlastRadiusLimits,
    violation_log: Arc<SloViolationLog>,
    policy_state: Arc<PolicyStateService>,
    blast_radius: Arc<BlastRadiusService>,
    discovery: Option<Arc<dyn ResourceDiscovery>>,
    alerts: Arc<dyn AlertSink>,
}

impl RunGuards {
    pub fn from_config(config: &ChaosGateConfig) -> Self {
        Self {
            slo: config.slo_guard,
            policy: config.policy_guard,
            blast: config.blast_guard,
            limits: config.blast_radius,
            violation_log: Arc::new(SloViolationLog::new(config.violation_window)),
            policy_state: Arc::new(PolicyStateService::new()),
            blast_radius: Arc::new(BlastRadiusService::new()),
            discovery: None,
            alerts: Arc::new(TracingAlertSink),
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn ResourceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn violation_log(&self) -> &Arc<SloViolationLog> {
        &self.violation_log
    }

    pub fn policy_state(&self) -> &Arc<PolicyStateService> {
        &self.policy_state
    }

    /// Shared with the orchestrator so agent-reported resources count.
    pub fn blast_radius(&self) -> &Arc<BlastRadiusService> {
        &self.blast_radius
    }

    /// One composite checker for `plan`, keyed by its run id.
    pub fn checker_for(&self, plan: &RunPlan, orchestrator: &Orchestrator) -> CompositeChecker {
        let run_id = plan.run_id.as_str();
        let slos = &plan.definition.slos;

        let slo = SloChecker::new(
            run_id,
            slos.clone(),
            orchestrator.evaluator().clone(),
            Arc::clone(&self.violation_log),
        );
        let policy_source = RepositoryPolicySource::new(
            Arc::clone(orchestrator.repository()),
            plan.experiment_id(),
        );
        let policy = PolicyChecker::new(
            run_id,
            slos,
            Arc::new(policy_source),
            Arc::clone(&self.policy_state),
        );
        let mut blast =
            BlastRadiusChecker::new(run_id, self.limits, Arc::clone(&self.blast_radius));
        if let Some(discovery) = &self.discovery {
            blast = blast.with_discovery(Arc::clone(discovery));
        }

        CompositeChecker::new(run_id)
            .with_guard(Arc::new(slo), &self.slo)
            .with_guard(Arc::new(policy), &self.policy)
            .with_guard(Arc::new(blast), &self.blast)
    }

    /// Guard ticking at the composite's shortest member interval. Each
    /// member's violations are judged by that member's own abort policy and
    /// alerting; the SLO guard's settings apply to anything else.
    pub fn guard_for(&self, checker: &CompositeChecker, orchestrator: &Orchestrator) -> Guard {
        let interval = checker.tick_interval().unwrap_or(self.slo.interval());
        let config = GuardConfig {
            interval_ms: interval.as_millis() as u64,
            max_duration_ms: self
                .slo
                .max_duration_ms
                .max(self.policy.max_duration_ms)
                .max(self.blast.max_duration_ms),
            ..self.slo
        };
        Guard::new(config)
            .with_alerts(Arc::clone(&self.alerts))
            .with_metrics(Arc::clone(orchestrator.metrics()))
    }
}

pub struct ControlPlane {
    repo: Arc<dyn ExperimentRepository>,
    admission: Arc<dyn AdmissionPolicy>,
    orchestrator: Arc<Orchestrator>,
    guards: RunGuards,
}

impl ControlPlane {
    pub fn new(
        repo: Arc<dyn ExperimentRepository>,
        admission: Arc<dyn AdmissionPolicy>,
        orchestrator: Arc<Orchestrator>,
        guards: RunGuards,
    ) -> Self {
        Self {
            repo,
            admission,
            orchestrator,
            guards,
        }
    }

    /// Wire every component from `config`.
    pub fn from_config(
        config: &ChaosGateConfig,
        repo: Arc<dyn ExperimentRepository>,
        agent: Arc<dyn FaultAgent>,
        metric_source: Arc<dyn MetricSource>,
    ) -> Self {
        let guards = RunGuards::from_config(config);
        let orchestrator = Orchestrator::new(Arc::clone(&repo), agent, metric_source)
            .with_config(config.orchestrator)
            .with_blast_radius(Arc::clone(guards.blast_radius()));
        Self::new(
            repo,
            Arc::new(RuleAdmission::new(config.admission.clone())),
            Arc::new(orchestrator),
            guards,
        )
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn guards(&self) -> &RunGuards {
        &self.guards
    }

    /// Admit and store `definition` under a fresh id.
    pub async fn create_experiment(&self, definition: &ExperimentDefinition) -> Result<String> {
        if definition.name.trim().is_empty() {
            return Err(ChaosError::InvalidDefinition("name is empty".into()));
        }
        if !self.admission.is_allowed(definition) {
            let reason = self
                .admission
                .denial_reason(definition)
                .unwrap_or_else(|| "denied by admission policy".to_string());
            return Err(ChaosError::PolicyDenied { reason });
        }
        if let Some(note) = self.admission.denial_reason(definition) {
            info!(experiment = %definition.name, note = %note, "experiment admitted with note");
        }

        let stored = definition.with_new_id();
        self.repo.save_definition(&stored).await?;
        info!(experiment_id = %stored.id, name = %stored.name, "experiment created");
        Ok(stored.id)
    }

    async fn plan_run(&self, experiment_id: &str, dry_run: bool) -> Result<RunPlan> {
        let definition = self
            .repo
            .find_definition(experiment_id)
            .await?
            .ok_or_else(|| ChaosError::NotFound(format!("experiment {experiment_id}")))?;
        if dry_run && !definition.dry_run_allowed {
            return Err(ChaosError::PolicyDenied {
                reason: format!("dry run not allowed for experiment {experiment_id}"),
            });
        }
        Ok(RunPlan::new(definition, dry_run))
    }

    /// Create a run and hand it to the agent without waiting for it.
    pub async fn schedule_run(&self, experiment_id: &str, dry_run: bool) -> Result<String> {
        let plan = self.plan_run(experiment_id, dry_run).await?;
        let run_id = self.orchestrator.dispatch(plan).await?;
        info!(run_id = %run_id, experiment_id = %experiment_id, dry_run, "run scheduled");
        Ok(run_id)
    }

    /// Create a run and drive it to its report under the SLO, policy and
    /// blast-radius guards.
    pub async fn execute_run(&self, experiment_id: &str, dry_run: bool) -> Result<Report> {
        let plan = self.plan_run(experiment_id, dry_run).await?;
        let checker = self.guards.checker_for(&plan, &self.orchestrator);
        let guard = self.guards.guard_for(&checker, &self.orchestrator);
        self.orchestrator
            .run_monitored(plan, &guard, Arc::new(checker))
            .await
    }

    pub async fn abort_run(&self, run_id: &str, reason: &str) -> Result<Report> {
        if self.repo.find_run_plan(run_id).await?.is_none() {
            return Err(ChaosError::NotFound(format!("run {run_id}")));
        }
        self.orchestrator.abort_run(run_id, reason).await
    }

    pub async fn report(&self, run_id: &str) -> Result<Report> {
        self.repo
            .find_report(run_id)
            .await?
            .ok_or_else(|| ChaosError::NotFound(format!("report {run_id}")))
    }

    /// Live state while active, the report outcome once finalized.
    pub async fn run_state(&self, run_id: &str) -> Result<RunState> {
        if let Some(info) = self.orchestrator.run_state(run_id) {
            return Ok(info.state);
        }
        if let Some(report) = self.repo.find_report(run_id).await? {
            return Ok(report.outcome);
        }
        match self.repo.find_run_plan(run_id).await? {
            Some(_) => Ok(RunState::Scheduled),
            None => Err(ChaosError::NotFound(format!("run {run_id}"))),
        }
    }

    pub async fn list_experiments(&self) -> Result<Vec<ExperimentDefinition>> {
        Ok(self.repo.find_all().await?)
    }

    pub async fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        if !self.repo.delete_by_id(experiment_id).await? {
            return Err(ChaosError::NotFound(format!("experiment {experiment_id}")));
        }
        info!(experiment_id = %experiment_id, "experiment deleted");
        Ok(())
    }

    pub async fn runs_for_experiment(&self, experiment_id: &str) -> Result<Vec<RunPlan>> {
        Ok(self.repo.runs_for_experiment(experiment_id).await?)
    }
}
