//! ChaosGate core library.
//!
//! Runs fault-injection experiments while SLOs, the enforced policy and the
//! blast radius are continuously verified, and derives every run's final
//! outcome from a last authoritative SLO evaluation.

pub mod admission;
pub mod agent;
pub mod config;
pub mod control_plane;
pub mod domain;
pub mod guard;
pub mod metric_source;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod services;
pub mod slo;
pub mod store;
pub mod telemetry;

pub use admission::{AdmissionPolicy, AdmissionRules, RuleAdmission};
pub use agent::{
    AgentCommand, AgentError, AgentReporter, AgentUpdate, FaultAgent, ProcessFaultAgent,
    SimulatedFaultAgent,
};
pub use config::{AgentConfig, ChaosGateConfig, MetricsConfig, OrchestratorConfig};
pub use control_plane::{ControlPlane, RunGuards};
pub use domain::{
    AgentStatus, ChaosError, Comparator, ExperimentDefinition, FaultKind, Report, Result,
    RunPlan, RunState, SloTarget, TargetSystem,
};
pub use guard::{
    run_guarded, AbortPolicy, AbortSignal, CheckOutcome, Checker, Guard, GuardConfig, GuardError,
    GuardStats, Guarded, ViolationRecord,
};
pub use metric_source::{
    MetricError, MetricSample, MetricSource, PrometheusMetricSource, StaticMetricSource,
};
pub use metrics::Metrics;
pub use orchestrator::{Orchestrator, RunStateInfo};
pub use slo::{SloBreach, SloEvaluation, SloEvaluator};
pub use store::{ExperimentRepository, InMemoryExperimentRepository, StorageError};
pub use telemetry::init_tracing;

/// Crate version, as recorded in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
