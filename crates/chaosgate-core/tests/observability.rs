//! Structured events emitted over a run's lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chaosgate_core::obs::{
    emit_guard_violation, emit_run_dispatch_failed, emit_run_finalized, RunSpan,
};
use chaosgate_core::{
    AgentStatus, ExperimentDefinition, FaultKind, InMemoryExperimentRepository, Orchestrator,
    RunPlan, RunState, SimulatedFaultAgent, SloTarget, StaticMetricSource, TargetSystem,
};
use tracing_test::traced_test;

fn plan() -> RunPlan {
    RunPlan::new(
        ExperimentDefinition {
            id: "exp-obs".into(),
            name: "memory pressure".into(),
            fault: FaultKind::MemoryStress,
            parameters: Default::default(),
            target: TargetSystem::new("dev-cluster", "test"),
            timeout_secs: 30,
            slos: vec![SloTarget::new("latency_p95", "latency_query", 500.0, "<")],
            dry_run_allowed: true,
            created_by: "sre".into(),
        },
        true,
    )
}

#[traced_test]
#[test]
fn finalized_event_carries_outcome() {
    emit_run_finalized("run-obs-1", "FAILED", true, 1_250);
    assert!(logs_contain("run.finalized"));
    assert!(logs_contain("run-obs-1"));
}

#[traced_test]
#[test]
fn dispatch_failure_logs_error_text() {
    emit_run_dispatch_failed("run-obs-2", &"agent binary missing");
    assert!(logs_contain("run.dispatch_failed"));
    assert!(logs_contain("agent binary missing"));
}

#[traced_test]
#[test]
fn guard_violation_event_names_checker() {
    emit_guard_violation("blast_radius", "run-obs-3", "Pods: 4 > 3 (limit)");
    assert!(logs_contain("guard.violation"));
    assert!(logs_contain("Pods: 4 > 3 (limit)"));
}

#[traced_test]
#[test]
fn run_span_enter_and_drop() {
    let span = RunSpan::enter("run-obs-span");
    drop(span);
}

#[traced_test]
#[tokio::test]
async fn lifecycle_emits_dispatch_update_and_override() {
    let metrics = Arc::new(StaticMetricSource::with_values([("latency_query", 100.0)]));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(InMemoryExperimentRepository::new()),
        Arc::new(SimulatedFaultAgent::new(Duration::from_secs(60))),
        metrics.clone(),
    ));

    let run_id = orchestrator.dispatch(plan()).await.unwrap();
    let applied =
        orchestrator.handle_agent_update(&run_id, AgentStatus::Observing, Default::default());
    assert!(applied);
    metrics.set("latency_query", 900.0);
    orchestrator
        .finalize_run(&run_id, RunState::Completed)
        .await
        .unwrap();

    assert!(logs_contain("run.dispatched"));
    assert!(logs_contain("run.agent_update"));
    assert!(logs_contain("run.outcome_overridden"));
    assert!(logs_contain("run.finalized"));
}
