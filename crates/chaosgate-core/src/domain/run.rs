//! Run plans, run lifecycle states and final reports.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::experiment::ExperimentDefinition;

/// A scheduled instantiation of an experiment. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub run_id: String,
    pub definition: ExperimentDefinition,
    pub scheduled_at: DateTime<Utc>,
    pub dry_run: bool,
}

impl RunPlan {
    /// Create a plan with a fresh run id, scheduled now.
    pub fn new(definition: ExperimentDefinition, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            definition,
            scheduled_at: Utc::now(),
            dry_run,
        }
    }

    pub fn experiment_id(&self) -> &str {
        &self.definition.id
    }
}

/// Lifecycle state of a run as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Scheduled,
    /// Handed to the agent; agent phases are tracked separately.
    Dispatched,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Scheduled => "SCHEDULED",
            RunState::Dispatched => "DISPATCHED",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase reported by a fault agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Preparing,
    Injecting,
    Observing,
    Recovering,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Preparing => "PREPARING",
            AgentStatus::Injecting => "INJECTING",
            AgentStatus::Observing => "OBSERVING",
            AgentStatus::Recovering => "RECOVERING",
            AgentStatus::Completed => "COMPLETED",
            AgentStatus::Failed => "FAILED",
        }
    }

    /// `COMPLETED` and `FAILED` mark a run ready for finalization.
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Failed)
    }

    /// Run state a terminal agent status finalizes into.
    pub fn terminal_outcome(self) -> Option<RunState> {
        match self {
            AgentStatus::Completed => Some(RunState::Completed),
            AgentStatus::Failed => Some(RunState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PREPARING" => Ok(AgentStatus::Preparing),
            "INJECTING" => Ok(AgentStatus::Injecting),
            "OBSERVING" => Ok(AgentStatus::Observing),
            "RECOVERING" => Ok(AgentStatus::Recovering),
            "COMPLETED" => Ok(AgentStatus::Completed),
            "FAILED" => Ok(AgentStatus::Failed),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Final, immutable record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: String,
    pub experiment_id: String,
    pub experiment_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: RunState,
    /// SLO measurements plus breach and audit keys.
    pub results: BTreeMap<String, serde_json::Value>,
}

impl Report {
    pub fn breach_detected(&self) -> bool {
        self.results
            .get("breach_detected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_terminal() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(!AgentStatus::Observing.is_terminal());
        assert_eq!(
            AgentStatus::Completed.terminal_outcome(),
            Some(RunState::Completed)
        );
        assert_eq!(AgentStatus::Injecting.terminal_outcome(), None);
    }

    #[test]
    fn agent_status_parse_is_case_insensitive() {
        assert_eq!("injecting".parse(), Ok(AgentStatus::Injecting));
        assert_eq!(" RECOVERING ".parse(), Ok(AgentStatus::Recovering));
        assert!("DONE".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn run_state_serializes_uppercase() {
        let json = serde_json::to_string(&RunState::Aborted).unwrap();
        assert_eq!(json, "\"ABORTED\"");
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::Dispatched.is_terminal());
    }
}
