use std::sync::Arc;
use std::time::Duration;

use chaosgate_core::{
    AgentStatus, ChaosError, ChaosGateConfig, ControlPlane, ExperimentDefinition, FaultKind,
    InMemoryExperimentRepository, RunState, SimulatedFaultAgent, SloTarget, StaticMetricSource,
    TargetSystem,
};

fn plane() -> ControlPlane {
    ControlPlane::from_config(
        &ChaosGateConfig::default(),
        Arc::new(InMemoryExperimentRepository::new()),
        Arc::new(SimulatedFaultAgent::new(Duration::from_secs(1))),
        Arc::new(StaticMetricSource::with_values([("error_rate", 0.2)])),
    )
}

fn definition(name: &str) -> ExperimentDefinition {
    ExperimentDefinition {
        id: String::new(),
        name: name.into(),
        fault: FaultKind::PodKill,
        parameters: Default::default(),
        target: TargetSystem::new("dev-cluster", "dev"),
        timeout_secs: 60,
        slos: vec![SloTarget::new("error_rate", "error_rate", 1.0, "<")],
        dry_run_allowed: false,
        created_by: "chaos-team".into(),
    }
}

#[tokio::test]
async fn create_list_and_delete() {
    let plane = plane();
    let first = plane.create_experiment(&definition("pod kill")).await.unwrap();
    let second = plane.create_experiment(&definition("pod kill again")).await.unwrap();
    assert_ne!(first, second);

    let mut names: Vec<_> = plane
        .list_experiments()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(names, ["pod kill", "pod kill again"]);

    plane.delete_experiment(&first).await.unwrap();
    assert_eq!(plane.list_experiments().await.unwrap().len(), 1);
    let err = plane.delete_experiment(&first).await.unwrap_err();
    assert!(matches!(err, ChaosError::NotFound(_)));
}

#[tokio::test]
async fn admission_denial_is_policy_denied() {
    let plane = plane();
    let mut def = definition("prod blast");
    def.target.namespace = "production".into();

    let err = plane.create_experiment(&def).await.unwrap_err();
    let ChaosError::PolicyDenied { reason } = err else {
        panic!("expected PolicyDenied, got {err:?}");
    };
    assert!(reason.starts_with("Invalid namespace: 'production'"));
    assert!(plane.list_experiments().await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_name_is_rejected() {
    let err = plane().create_experiment(&definition("  ")).await.unwrap_err();
    assert!(matches!(err, ChaosError::InvalidDefinition(_)));
}

#[tokio::test]
async fn dry_run_requires_permission() {
    let plane = plane();
    let id = plane.create_experiment(&definition("pod kill")).await.unwrap();

    let err = plane.schedule_run(&id, true).await.unwrap_err();
    assert!(
        matches!(err, ChaosError::PolicyDenied { ref reason } if reason.contains("dry run not allowed"))
    );
    assert!(plane.runs_for_experiment(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_experiment_cannot_run() {
    let err = plane().schedule_run("missing", false).await.unwrap_err();
    assert!(matches!(err, ChaosError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn scheduled_run_is_tracked_until_finalized() {
    let plane = plane();
    let id = plane.create_experiment(&definition("pod kill")).await.unwrap();
    let run_id = plane.schedule_run(&id, false).await.unwrap();

    assert_eq!(plane.run_state(&run_id).await.unwrap(), RunState::Dispatched);
    let runs = plane.runs_for_experiment(&id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, run_id);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let info = plane.orchestrator().run_state(&run_id).unwrap();
    assert_eq!(info.last_status, Some(AgentStatus::Injecting));

    let report = plane.abort_run(&run_id, "operator stop").await.unwrap();
    assert_eq!(report.outcome, RunState::Aborted);
    assert_eq!(plane.run_state(&run_id).await.unwrap(), RunState::Aborted);
    assert_eq!(plane.report(&run_id).await.unwrap(), report);
}

#[tokio::test]
async fn abort_of_unknown_run_is_not_found() {
    let err = plane().abort_run("no-such-run", "stop").await.unwrap_err();
    assert!(matches!(err, ChaosError::NotFound(_)));

    let err = plane().run_state("no-such-run").await.unwrap_err();
    assert!(matches!(err, ChaosError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn execute_run_returns_final_report() {
    let plane = plane();
    let id = plane.create_experiment(&definition("pod kill")).await.unwrap();

    let report = plane.execute_run(&id, false).await.unwrap();

    assert_eq!(report.outcome, RunState::Completed);
    assert_eq!(report.experiment_id, id);
    assert_eq!(report.results["error_rate"], serde_json::json!(0.2));
    assert_eq!(plane.report(&report.run_id).await.unwrap(), report);
    assert_eq!(
        plane.run_state(&report.run_id).await.unwrap(),
        RunState::Completed
    );
}
