//! Run lifecycle: dispatch, agent updates and finalization.
//!
//! The orchestrator owns one [`RunStateInfo`] per active run, created at
//! dispatch and removed once its report is stored. Finalization always re-evaluates
//! the plan's SLOs and forces the outcome to `FAILED` on a breach, whatever
//! the agent reported.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Instrument};

use crate::agent::{AgentCommand, AgentReporter, AgentUpdate, FaultAgent};
use crate::config::OrchestratorConfig;
use crate::domain::{AgentStatus, ChaosError, Report, Result, RunPlan, RunState};
use crate::guard::{AbortSignal, Checker, Guard, GuardError};
use crate::metric_source::MetricSource;
use crate::metrics::Metrics;
use crate::obs::{self, RunSpan};
use crate::services::BlastRadiusService;
use crate::slo::SloEvaluator;
use crate::store::ExperimentRepository;

/// Live state of an active run. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStateInfo {
    pub run_id: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_status: Option<AgentStatus>,
    /// Agent payloads merged in arrival order; later keys win.
    pub payload: Map<String, Value>,
}

struct RunEntry {
    info: RunStateInfo,
    namespace: String,
    status_tx: watch::Sender<Option<AgentStatus>>,
    /// A finalization holds the run; others see it as already gone.
    finalizing: bool,
}

/// Claim on a run being finalized. Dropping it without [`Self::complete`]
/// hands the run back so finalization can be retried.
struct FinalizeClaim<'a> {
    runs: &'a Mutex<HashMap<String, RunEntry>>,
    run_id: &'a str,
    saved: bool,
}

impl FinalizeClaim<'_> {
    /// The report is stored; the run leaves the active set.
    fn complete(mut self) {
        self.saved = true;
    }
}

impl Drop for FinalizeClaim<'_> {
    fn drop(&mut self) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if self.saved {
            runs.remove(self.run_id);
        } else if let Some(entry) = runs.get_mut(self.run_id) {
            entry.finalizing = false;
        }
    }
}

/// How a monitored run's wait for the agent ended.
enum Waited {
    Terminal(AgentStatus),
    /// Guard abort, or the run was finalized elsewhere.
    Interrupted,
    TimedOut,
}

pub struct Orchestrator {
    repo: Arc<dyn ExperimentRepository>,
    agent: Arc<dyn FaultAgent>,
    evaluator: SloEvaluator,
    config: OrchestratorConfig,
    metrics: Arc<Metrics>,
    blast_radius: Option<Arc<BlastRadiusService>>,
    runs: Mutex<HashMap<String, RunEntry>>,
    reporter: AgentReporter,
    pending_updates: Mutex<Option<mpsc::UnboundedReceiver<AgentUpdate>>>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn ExperimentRepository>,
        agent: Arc<dyn FaultAgent>,
        metric_source: Arc<dyn MetricSource>,
    ) -> Self {
        let (reporter, rx) = AgentReporter::channel();
        Self {
            repo,
            agent,
            evaluator: SloEvaluator::new(metric_source),
            config: OrchestratorConfig::default(),
            metrics: Arc::new(Metrics::new()),
            blast_radius: None,
            runs: Mutex::new(HashMap::new()),
            reporter,
            pending_updates: Mutex::new(Some(rx)),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Record resources listed in agent payloads (`affected_pods`,
    /// `affected_namespaces`, `affected_services`) on `service`, keyed by
    /// run id.
    pub fn with_blast_radius(mut self, service: Arc<BlastRadiusService>) -> Self {
        self.blast_radius = Some(service);
        self
    }

    pub fn evaluator(&self) -> &SloEvaluator {
        &self.evaluator
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn repository(&self) -> &Arc<dyn ExperimentRepository> {
        &self.repo
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunEntry>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start draining agent updates into [`Self::handle_agent_update`].
    /// Only the first call spawns the pump.
    fn ensure_update_pump(self: &Arc<Self>) {
        let Some(mut rx) = self
            .pending_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                orchestrator.handle_agent_update(&update.run_id, update.status, update.payload);
            }
            debug!("agent update pump stopped");
        });
    }

    /// Persist `plan`, register it as `SCHEDULED` and hand it to the agent.
    ///
    /// Returns as soon as the hand-off is done. A failed hand-off leaves the
    /// run in `FAILED` (ready to be finalized) and returns
    /// [`ChaosError::DispatchFailed`].
    pub async fn dispatch(self: &Arc<Self>, plan: RunPlan) -> Result<String> {
        self.dispatch_inner(plan, None).await
    }

    /// As [`Self::dispatch`], but when `abort` has fired by the time the run
    /// is registered the agent is never started. The run stays registered so
    /// it can be finalized as aborted.
    async fn dispatch_inner(
        self: &Arc<Self>,
        plan: RunPlan,
        abort: Option<&AbortSignal>,
    ) -> Result<String> {
        let run_id = plan.run_id.clone();
        if self.runs().contains_key(&run_id) {
            return Err(ChaosError::InvalidDefinition(format!(
                "run {run_id} is already active"
            )));
        }

        if self.config.validate_baseline && !plan.definition.slos.is_empty() {
            let evaluation = self.evaluator.evaluate(&plan.definition.slos).await;
            if let Some(breach) = evaluation.first_breach() {
                warn!(
                    run_id = %run_id,
                    breach = %breach.describe(),
                    "baseline already breached; not dispatching"
                );
                return Err(ChaosError::BaselineBreached {
                    reason: breach.describe(),
                });
            }
        }

        self.repo.save_run_plan(&plan).await?;

        let now = Utc::now();
        let (status_tx, _) = watch::channel(None);
        self.runs().insert(
            run_id.clone(),
            RunEntry {
                info: RunStateInfo {
                    run_id: run_id.clone(),
                    state: RunState::Scheduled,
                    started_at: now,
                    last_update: now,
                    last_status: None,
                    payload: Map::new(),
                },
                namespace: plan.definition.target.namespace.clone(),
                status_tx,
                finalizing: false,
            },
        );
        self.ensure_update_pump();

        if abort.is_some_and(AbortSignal::is_aborted) {
            info!(run_id = %run_id, "guard aborted before hand-off; agent not started");
            return Err(ChaosError::DispatchFailed {
                run_id,
                reason: "guard aborted before hand-off".into(),
            });
        }

        let command = AgentCommand::from_plan(&plan);
        match self.agent.dispatch(command, self.reporter.clone()).await {
            Ok(()) => {
                self.set_state(&run_id, RunState::Dispatched);
                self.metrics.inc_runs_dispatched();
                obs::emit_run_dispatched(
                    &run_id,
                    &plan.definition.name,
                    plan.definition.fault.agent_arg(),
                    plan.dry_run,
                );
                Ok(run_id)
            }
            Err(e) => {
                self.set_state(&run_id, RunState::Failed);
                self.metrics.inc_dispatch_failures();
                obs::emit_run_dispatch_failed(&run_id, &e);
                Err(ChaosError::DispatchFailed {
                    run_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    fn set_state(&self, run_id: &str, state: RunState) {
        if let Some(entry) = self.runs().get_mut(run_id) {
            entry.info.state = state;
            entry.info.last_update = Utc::now();
        }
    }

    /// Apply an agent progress update. Updates for unknown runs are ignored.
    ///
    /// A terminal status only marks the run ready for finalization; it does
    /// not produce a report. Returns whether the update was applied.
    pub fn handle_agent_update(
        &self,
        run_id: &str,
        status: AgentStatus,
        payload: Map<String, Value>,
    ) -> bool {
        let _span = RunSpan::enter(run_id);
        let namespace = {
            let mut runs = self.runs();
            let Some(entry) = runs.get_mut(run_id) else {
                drop(runs);
                obs::emit_run_update_ignored(run_id, status.as_str());
                return false;
            };
            entry.info.last_status = Some(status);
            entry.info.last_update = Utc::now();
            entry
                .info
                .payload
                .extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.metrics.inc_agent_updates();
            entry.status_tx.send_replace(Some(status));
            entry.namespace.clone()
        };

        obs::emit_run_agent_update(run_id, status.as_str());
        self.record_affected(run_id, &namespace, &payload);
        true
    }

    fn record_affected(&self, run_id: &str, namespace: &str, payload: &Map<String, Value>) {
        let Some(service) = &self.blast_radius else {
            return;
        };
        for pod in string_items(payload.get("affected_pods")) {
            service.record_affected_pod(run_id, pod, namespace);
        }
        for ns in string_items(payload.get("affected_namespaces")) {
            service.record_affected_namespace(run_id, ns);
        }
        for svc in string_items(payload.get("affected_services")) {
            service.record_affected_service(run_id, svc);
        }
    }

    /// Build, persist and return the final report for `run_id`.
    ///
    /// The plan's SLOs are evaluated once more; on a breach the outcome is
    /// `FAILED` regardless of `reported`, and the result map records
    /// `breach_detected`, `breach_reason` and `original_outcome`.
    ///
    /// The run stays active until the report is stored. While one call is
    /// finalizing, or once it has succeeded, other calls fail with
    /// `NotFound`. If loading the plan or saving the report fails the run
    /// is left active and finalization can be retried.
    pub async fn finalize_run(&self, run_id: &str, reported: RunState) -> Result<Report> {
        self.finalize_with(run_id, reported, BTreeMap::new()).await
    }

    async fn finalize_with(
        &self,
        run_id: &str,
        reported: RunState,
        extra: BTreeMap<String, Value>,
    ) -> Result<Report> {
        let (started_at, last_status) = {
            let mut runs = self.runs();
            match runs.get_mut(run_id) {
                Some(entry) if !entry.finalizing => {
                    entry.finalizing = true;
                    (entry.info.started_at, entry.info.last_status)
                }
                _ => return Err(ChaosError::NotFound(format!("active run {run_id}"))),
            }
        };
        let claim = FinalizeClaim {
            runs: &self.runs,
            run_id,
            saved: false,
        };

        let plan = self
            .repo
            .find_run_plan(run_id)
            .await?
            .ok_or_else(|| ChaosError::NotFound(format!("run plan {run_id}")))?;

        let evaluation = self.evaluator.evaluate(&plan.definition.slos).await;
        let mut results = evaluation.to_result_map();
        results.extend(extra);
        if let Some(status) = last_status {
            results.insert("last_agent_status".into(), json!(status.as_str()));
        }

        let outcome = match evaluation.first_breach() {
            Some(breach) => {
                let reason = format!("SLO breach: {}", breach.describe());
                if reported != RunState::Failed {
                    self.metrics.inc_outcomes_overridden();
                    obs::emit_run_outcome_overridden(run_id, reported.as_str(), &reason);
                }
                results.insert("breach_detected".into(), json!(true));
                results.insert("breach_reason".into(), json!(reason));
                results.insert("original_outcome".into(), json!(reported.as_str()));
                RunState::Failed
            }
            None => {
                results.insert("breach_detected".into(), json!(false));
                reported
            }
        };

        let report = Report {
            run_id: run_id.to_string(),
            experiment_id: plan.definition.id.clone(),
            experiment_name: plan.definition.name.clone(),
            started_at,
            ended_at: Utc::now(),
            outcome,
            results,
        };
        self.repo.save_report(&report).await?;
        claim.complete();

        self.metrics.inc_runs_finalized();
        obs::emit_run_finalized(
            run_id,
            outcome.as_str(),
            report.breach_detected(),
            report.duration_ms(),
        );
        Ok(report)
    }

    /// Operator abort: finalize as `ABORTED`, still subject to the SLO
    /// override.
    pub async fn abort_run(&self, run_id: &str, reason: &str) -> Result<Report> {
        info!(run_id = %run_id, reason = %reason, "run aborted by operator");
        let extra = BTreeMap::from([("abort_reason".to_string(), json!(reason))]);
        self.finalize_with(run_id, RunState::Aborted, extra).await
    }

    pub fn run_state(&self, run_id: &str) -> Option<RunStateInfo> {
        self.runs().get(run_id).map(|e| e.info.clone())
    }

    /// Ids of runs dispatched but not yet finalized, sorted.
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runs().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until the agent reports a terminal status for `run_id`.
    ///
    /// Resolves to `None` when `abort` fires or the run is finalized while
    /// waiting.
    pub async fn wait_for_terminal(
        &self,
        run_id: &str,
        mut abort: AbortSignal,
    ) -> Result<Option<AgentStatus>> {
        let mut rx = self
            .runs()
            .get(run_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| ChaosError::NotFound(format!("active run {run_id}")))?;

        tokio::select! {
            status = rx.wait_for(|s| s.is_some_and(AgentStatus::is_terminal)) => {
                Ok(status.ok().and_then(|s| *s))
            }
            _ = abort.aborted() => Ok(None),
        }
    }

    /// Dispatch `plan` and wait for the agent under continuous verification.
    ///
    /// The guard's baseline is captured before dispatch. A guard abort
    /// finalizes the run as `ABORTED` with `abort_reason` and
    /// `guard_violations`; a failed hand-off finalizes it as `FAILED` with
    /// `dispatch_error`; no terminal status within the experiment timeout
    /// plus grace finalizes it as `FAILED` with `timed_out`. Every path still
    /// goes through the SLO override.
    pub async fn run_monitored(
        self: &Arc<Self>,
        plan: RunPlan,
        guard: &Guard,
        checker: Arc<dyn Checker>,
    ) -> Result<Report> {
        let run_id = plan.run_id.clone();
        let span = tracing::info_span!("chaosgate.run", run_id = %run_id);
        self.run_monitored_inner(plan, guard, checker)
            .instrument(span)
            .await
    }

    async fn run_monitored_inner(
        self: &Arc<Self>,
        plan: RunPlan,
        guard: &Guard,
        checker: Arc<dyn Checker>,
    ) -> Result<Report> {
        let run_id = plan.run_id.clone();
        let deadline = Duration::from_secs(plan.definition.timeout_secs)
            + Duration::from_millis(self.config.terminal_grace_ms);

        let this = Arc::clone(self);
        let outcome = guard
            .run(checker, move |abort| this.dispatch_and_wait(plan, deadline, abort))
            .await;

        match outcome {
            Ok(guarded) => {
                let mut extra = BTreeMap::new();
                if guarded.stats.monitor_failed {
                    warn!(run_id = %run_id, "guard monitor failed; run was not fully verified");
                    extra.insert("guard_monitor_failed".to_string(), json!(true));
                }
                if !guarded.violations.is_empty() {
                    extra.insert(
                        "guard_violations".to_string(),
                        serde_json::to_value(&guarded.violations)?,
                    );
                }
                match guarded.value {
                    Waited::Terminal(status) => {
                        let reported = status.terminal_outcome().unwrap_or(RunState::Failed);
                        self.finalize_with(&run_id, reported, extra).await
                    }
                    Waited::TimedOut => {
                        warn!(run_id = %run_id, "no terminal agent status before deadline");
                        extra.insert("timed_out".to_string(), json!(true));
                        self.finalize_with(&run_id, RunState::Failed, extra).await
                    }
                    Waited::Interrupted => self.existing_report(&run_id).await,
                }
            }
            Err(GuardError::Violation {
                kind, violations, ..
            }) => {
                let reason = match violations.first() {
                    Some(v) => format!("{} guard violation: {}", v.checker, v.summary),
                    None => format!("{kind} guard violation"),
                };
                let extra = BTreeMap::from([
                    ("abort_reason".to_string(), json!(reason)),
                    (
                        "guard_violations".to_string(),
                        serde_json::to_value(&violations)?,
                    ),
                ]);
                match self.finalize_with(&run_id, RunState::Aborted, extra).await {
                    Err(ChaosError::NotFound(_)) => self.existing_report(&run_id).await,
                    other => other,
                }
            }
            Err(GuardError::Operation(ChaosError::DispatchFailed { reason, .. })) => {
                let extra = BTreeMap::from([("dispatch_error".to_string(), json!(reason))]);
                self.finalize_with(&run_id, RunState::Failed, extra).await
            }
            Err(GuardError::Operation(e)) | Err(GuardError::Baseline(e)) => Err(e),
        }
    }

    async fn dispatch_and_wait(
        self: Arc<Self>,
        plan: RunPlan,
        deadline: Duration,
        abort: AbortSignal,
    ) -> Result<Waited> {
        let run_id = self.dispatch_inner(plan, Some(&abort)).await?;
        match tokio::time::timeout(deadline, self.wait_for_terminal(&run_id, abort)).await {
            Ok(Ok(Some(status))) => Ok(Waited::Terminal(status)),
            Ok(Ok(None)) => Ok(Waited::Interrupted),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(Waited::TimedOut),
        }
    }

    /// The report of a run finalized by someone else while we waited.
    async fn existing_report(&self, run_id: &str) -> Result<Report> {
        self.repo
            .find_report(run_id)
            .await?
            .ok_or_else(|| ChaosError::NotFound(format!("report {run_id}")))
    }
}

fn string_items(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}
