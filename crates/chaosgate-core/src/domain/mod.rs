//! Domain model: experiment definitions, run plans, reports and errors.

pub mod error;
pub mod experiment;
pub mod run;

pub use error::{ChaosError, Result};
pub use experiment::{Comparator, ExperimentDefinition, FaultKind, SloTarget, TargetSystem};
pub use run::{AgentStatus, Report, RunPlan, RunState};
