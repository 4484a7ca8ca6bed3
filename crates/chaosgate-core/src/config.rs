//! Runtime configuration, loaded from TOML.
//!
//! Every section is optional; missing sections and fields take their
//! defaults. Durations are in milliseconds unless the name says otherwise.
//!
//! ```toml
//! [metrics]
//! prometheus_url = "http://prometheus:9090"
//!
//! [slo_guard]
//! interval_ms = 5000
//! abort_policy = { mode = "after_repeated", count = 3, window_ms = 60000 }
//!
//! [blast_radius]
//! max_pods = 5
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionRules;
use crate::domain::{ChaosError, Result};
use crate::guard::GuardConfig;
use crate::services::{BlastRadiusLimits, ViolationWindow};

/// Prometheus connection used by [`crate::PrometheusMetricSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub prometheus_url: String,
    pub request_timeout_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus_url: "http://localhost:9090".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

/// External fault agent process. Fault arguments are appended to `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["fault_agent.py".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Refuse to dispatch a run whose SLOs are already breached.
    pub validate_baseline: bool,
    /// Extra time after the experiment timeout before a monitored run is
    /// declared failed for lack of a terminal agent status.
    pub terminal_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            validate_baseline: true,
            terminal_grace_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosGateConfig {
    pub slo_guard: GuardConfig,
    pub policy_guard: GuardConfig,
    pub blast_guard: GuardConfig,
    pub blast_radius: BlastRadiusLimits,
    /// Windowed abort advice on SLO violations. Advisory only; guards abort
    /// according to their own `abort_policy`.
    pub violation_window: ViolationWindow,
    pub admission: AdmissionRules,
    pub metrics: MetricsConfig,
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for ChaosGateConfig {
    fn default() -> Self {
        Self {
            slo_guard: GuardConfig::slo(),
            policy_guard: GuardConfig::policy(),
            blast_guard: GuardConfig::blast_radius(),
            blast_radius: BlastRadiusLimits::default(),
            violation_window: ViolationWindow::default(),
            admission: AdmissionRules::default(),
            metrics: MetricsConfig::default(),
            agent: AgentConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ChaosGateConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ChaosError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)
            .map_err(|e| ChaosError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Apply `CHAOSGATE_PROMETHEUS_URL` and `CHAOSGATE_AGENT_PROGRAM` on top
    /// of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CHAOSGATE_PROMETHEUS_URL") {
            self.metrics.prometheus_url = url;
        }
        if let Ok(program) = std::env::var("CHAOSGATE_AGENT_PROGRAM") {
            self.agent.program = program;
        }
        self
    }
}
