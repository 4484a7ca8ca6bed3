//! End-to-end monitored runs: SLO, policy and blast-radius guards around a
//! dispatched experiment.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaosgate_core::guard::AbortPolicy;
use chaosgate_core::{
    AgentCommand, AgentError, AgentReporter, AgentStatus, ChaosError, ChaosGateConfig,
    ControlPlane, ExperimentDefinition, ExperimentRepository, FaultAgent, FaultKind,
    GuardConfig, InMemoryExperimentRepository, OrchestratorConfig, RunState, SimulatedFaultAgent,
    SloTarget, StaticMetricSource, TargetSystem,
};
use serde_json::{json, Map, Value};

fn guard(interval_ms: u64) -> GuardConfig {
    GuardConfig {
        interval_ms,
        alert_on_breach: false,
        ..GuardConfig::slo()
    }
}

fn config() -> ChaosGateConfig {
    ChaosGateConfig {
        slo_guard: guard(5_000),
        policy_guard: guard(5_000),
        blast_guard: guard(5_000),
        ..ChaosGateConfig::default()
    }
}

fn definition() -> ExperimentDefinition {
    ExperimentDefinition {
        id: String::new(),
        name: "cart latency".into(),
        fault: FaultKind::NetworkDelay,
        parameters: Map::new(),
        target: TargetSystem::new("staging-cluster", "default"),
        timeout_secs: 120,
        slos: vec![SloTarget::new("latency_p95", "latency_query", 500.0, "<")],
        dry_run_allowed: true,
        created_by: "sre".into(),
    }
}

struct Harness {
    plane: ControlPlane,
    repo: Arc<InMemoryExperimentRepository>,
    metrics: Arc<StaticMetricSource>,
    experiment_id: String,
}

async fn harness(config: ChaosGateConfig, agent: Arc<dyn FaultAgent>) -> Harness {
    let repo = Arc::new(InMemoryExperimentRepository::new());
    let metrics = Arc::new(StaticMetricSource::with_values([("latency_query", 350.0)]));
    let plane = ControlPlane::from_config(&config, repo.clone(), agent, metrics.clone());
    let experiment_id = plane.create_experiment(&definition()).await.unwrap();
    Harness {
        plane,
        repo,
        metrics,
        experiment_id,
    }
}

/// Phases every 10 s; COMPLETED at 40 s.
fn simulated() -> Arc<dyn FaultAgent> {
    Arc::new(SimulatedFaultAgent::new(Duration::from_secs(10)))
}

fn assert_no_monitoring_state(h: &Harness, run_id: &str) {
    let guards = h.plane.guards();
    assert!(h.plane.orchestrator().active_runs().is_empty());
    assert!(guards.policy_state().active_experiments().is_empty());
    assert!(!guards.blast_radius().is_tracking(run_id));
    assert!(!guards.violation_log().is_tracking(run_id));
}

#[tokio::test(start_paused = true)]
async fn healthy_run_completes_and_leaves_no_state() {
    let h = harness(config(), simulated()).await;

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Completed);
    assert!(!report.breach_detected());
    assert_eq!(report.results["last_agent_status"], json!("COMPLETED"));
    assert!(!report.results.contains_key("guard_violations"));
    assert_no_monitoring_state(&h, &report.run_id);

    let metrics = h.plane.orchestrator().metrics();
    assert_eq!(metrics.runs_finalized(), 1);
    assert!(metrics.guard_checks() >= 6);
    assert_eq!(metrics.guard_aborts(), 0);
}

#[tokio::test(start_paused = true)]
async fn slo_breach_mid_run_aborts_and_fails_the_run() {
    let h = harness(config(), simulated()).await;
    let metrics = h.metrics.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        metrics.set("latency_query", 650.0);
    });

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Failed);
    assert_eq!(report.results["original_outcome"], json!("ABORTED"));
    assert_eq!(
        report.results["abort_reason"],
        json!("slo guard violation: latency_p95=650 violates < 500")
    );
    let violations = report.results["guard_violations"].as_array().unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0]["checker"], json!("slo"));
    // aborted before the agent finished
    assert_ne!(report.results["last_agent_status"], json!("COMPLETED"));
    assert_eq!(h.plane.orchestrator().metrics().guard_aborts(), 1);
    assert_no_monitoring_state(&h, &report.run_id);
}

#[tokio::test(start_paused = true)]
async fn log_only_guard_keeps_running_but_finalize_still_fails() {
    let config = ChaosGateConfig {
        slo_guard: GuardConfig {
            abort_policy: AbortPolicy::LogOnly,
            ..guard(5_000)
        },
        ..config()
    };
    let h = harness(config, simulated()).await;
    let metrics = h.metrics.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        metrics.set("latency_query", 650.0);
    });

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Failed);
    assert_eq!(report.results["original_outcome"], json!("COMPLETED"));
    assert!(!report.results["guard_violations"]
        .as_array()
        .unwrap()
        .is_empty());
    assert!(!report.results.contains_key("abort_reason"));
}

#[tokio::test(start_paused = true)]
async fn policy_drift_aborts_the_run() {
    let h = harness(config(), simulated()).await;
    let repo = h.repo.clone();
    let experiment_id = h.experiment_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        let mut relaxed = repo.find_definition(&experiment_id).await.unwrap().unwrap();
        relaxed.slos[0].threshold = 2_000.0;
        repo.save_definition(&relaxed).await.unwrap();
    });

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Aborted);
    assert!(!report.breach_detected());
    assert_eq!(
        report.results["abort_reason"],
        json!("policy guard violation: SLO[0] threshold changed: 500 -> 2000")
    );
    let violation = &report.results["guard_violations"][0];
    assert_eq!(violation["baseline"][0]["threshold"], json!(500.0));
    assert_eq!(violation["observed"][0]["threshold"], json!(2000.0));
    assert_no_monitoring_state(&h, &report.run_id);
}

/// Reports four affected pods right away, then completes after a minute.
struct SpreadingAgent;

#[async_trait]
impl FaultAgent for SpreadingAgent {
    async fn dispatch(
        &self,
        command: AgentCommand,
        reporter: AgentReporter,
    ) -> Result<(), AgentError> {
        tokio::spawn(async move {
            let mut payload = Map::new();
            payload.insert(
                "affected_pods".into(),
                json!(["cart-1", "cart-2", "cart-3", "cart-4"]),
            );
            reporter.report(&command.run_id, AgentStatus::Injecting, payload);
            tokio::time::sleep(Duration::from_secs(60)).await;
            reporter.report(&command.run_id, AgentStatus::Completed, Map::new());
        });
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn blast_radius_breach_aborts_the_run() {
    let h = harness(config(), Arc::new(SpreadingAgent)).await;

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Aborted);
    assert_eq!(
        report.results["abort_reason"],
        json!("blast_radius guard violation: Pods: 4 > 3 (limit)")
    );
    let observed: &Value = &report.results["guard_violations"][0]["observed"];
    assert_eq!(observed["pods"].as_array().unwrap().len(), 4);
    assert_no_monitoring_state(&h, &report.run_id);
}

#[tokio::test(start_paused = true)]
async fn log_only_blast_guard_does_not_abort_under_aborting_slo_guard() {
    let config = ChaosGateConfig {
        slo_guard: GuardConfig {
            abort_policy: AbortPolicy::Abort,
            ..guard(5_000)
        },
        blast_guard: GuardConfig {
            abort_policy: AbortPolicy::LogOnly,
            ..guard(5_000)
        },
        ..config()
    };
    let h = harness(config, Arc::new(SpreadingAgent)).await;

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Completed);
    assert!(!report.results.contains_key("abort_reason"));
    assert_eq!(report.results["last_agent_status"], json!("COMPLETED"));
    let violations = report.results["guard_violations"].as_array().unwrap();
    assert!(!violations.is_empty());
    assert!(violations
        .iter()
        .all(|v| v["checker"] == json!("blast_radius")));
    assert_eq!(h.plane.orchestrator().metrics().guard_aborts(), 0);
    assert_no_monitoring_state(&h, &report.run_id);
}

/// Accepts the command and never reports.
struct SilentAgent;

#[async_trait]
impl FaultAgent for SilentAgent {
    async fn dispatch(
        &self,
        _command: AgentCommand,
        _reporter: AgentReporter,
    ) -> Result<(), AgentError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn silent_agent_times_out_as_failed() {
    let config = ChaosGateConfig {
        orchestrator: OrchestratorConfig {
            terminal_grace_ms: 1_000,
            ..OrchestratorConfig::default()
        },
        ..config()
    };
    let h = harness(config, Arc::new(SilentAgent)).await;

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Failed);
    assert_eq!(report.results["timed_out"], json!(true));
    assert_no_monitoring_state(&h, &report.run_id);
}

struct RefusingAgent;

#[async_trait]
impl FaultAgent for RefusingAgent {
    async fn dispatch(
        &self,
        _command: AgentCommand,
        _reporter: AgentReporter,
    ) -> Result<(), AgentError> {
        Err(AgentError::Rejected("cluster unreachable".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn failed_hand_off_becomes_failed_report() {
    let h = harness(config(), Arc::new(RefusingAgent)).await;

    let report = h.plane.execute_run(&h.experiment_id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Failed);
    assert_eq!(
        report.results["dispatch_error"],
        json!("fault agent rejected command: cluster unreachable")
    );
    assert_eq!(h.plane.orchestrator().metrics().dispatch_failures(), 1);
    assert_no_monitoring_state(&h, &report.run_id);
}

#[tokio::test(start_paused = true)]
async fn breached_baseline_refuses_to_start() {
    let h = harness(config(), simulated()).await;
    h.metrics.set("latency_query", 800.0);

    let err = h
        .plane
        .execute_run(&h.experiment_id, false)
        .await
        .unwrap_err();

    assert!(matches!(err, ChaosError::BaselineBreached { .. }));
    assert!(h.plane.orchestrator().active_runs().is_empty());
    assert!(h
        .plane
        .guards()
        .policy_state()
        .active_experiments()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn operator_abort_during_monitored_run_returns_its_report() {
    let h = harness(config(), simulated()).await;
    let runs = h.repo.clone();
    let experiment_id = h.experiment_id.clone();

    let run = h.plane.execute_run(&h.experiment_id, false);
    let abort = async {
        tokio::time::sleep(Duration::from_secs(15)).await;
        let plans = runs.runs_for_experiment(&experiment_id).await.unwrap();
        h.plane
            .abort_run(&plans[0].run_id, "game day cancelled")
            .await
            .unwrap()
    };
    let (report, aborted) = tokio::join!(run, abort);
    let report = report.unwrap();

    assert_eq!(report, aborted);
    assert_eq!(report.outcome, RunState::Aborted);
    assert_eq!(report.results["abort_reason"], json!("game day cancelled"));
    assert_no_monitoring_state(&h, &report.run_id);
}
