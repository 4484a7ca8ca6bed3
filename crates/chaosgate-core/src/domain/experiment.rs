//! Experiment definitions and the SLO targets they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of fault an experiment injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    CpuStress,
    MemoryStress,
    NetworkDelay,
    NetworkPartition,
    PodKill,
}

impl FaultKind {
    /// Fault argument understood by the fault agent.
    pub fn agent_arg(self) -> &'static str {
        match self {
            FaultKind::CpuStress => "cpu",
            FaultKind::MemoryStress => "memory",
            FaultKind::NetworkDelay | FaultKind::NetworkPartition => "network",
            FaultKind::PodKill => "exception",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultKind::CpuStress => "CPU_STRESS",
            FaultKind::MemoryStress => "MEMORY_STRESS",
            FaultKind::NetworkDelay => "NETWORK_DELAY",
            FaultKind::NetworkPartition => "NETWORK_PARTITION",
            FaultKind::PodKill => "POD_KILL",
        };
        f.write_str(s)
    }
}

/// Where the fault lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSystem {
    pub cluster: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TargetSystem {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
        }
    }
}

/// Comparison an SLO metric must satisfy against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    /// Whether `value` fails the objective `value <cmp> threshold`.
    ///
    /// Equality is a breach for `<` and `>`, and not for `<=` and `>=`.
    pub fn is_breached(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value >= threshold,
            Comparator::Le => value > threshold,
            Comparator::Gt => value <= threshold,
            Comparator::Ge => value < threshold,
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            other => Err(format!("unknown comparator: {other:?}")),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What must remain true while an experiment runs.
///
/// The comparator is kept as written in the definition so that an unknown
/// operator survives loading and is reported at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloTarget {
    /// Metric identifier, also the key in evaluation results (e.g. `latency_p95`).
    pub metric: String,
    /// Query handed verbatim to the metric source.
    pub query: String,
    pub threshold: f64,
    pub comparator: String,
}

impl SloTarget {
    pub fn new(
        metric: impl Into<String>,
        query: impl Into<String>,
        threshold: f64,
        comparator: impl Into<String>,
    ) -> Self {
        Self {
            metric: metric.into(),
            query: query.into(),
            threshold,
            comparator: comparator.into(),
        }
    }

    /// Parsed comparator, if the definition used a known operator.
    pub fn parsed_comparator(&self) -> Option<Comparator> {
        self.comparator.parse().ok()
    }
}

/// Immutable description of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    /// Assigned when the experiment is created; empty on a draft.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub fault: FaultKind,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub target: TargetSystem,
    /// Experiment timeout in seconds.
    pub timeout_secs: u64,
    #[serde(default)]
    pub slos: Vec<SloTarget>,
    #[serde(default)]
    pub dry_run_allowed: bool,
    pub created_by: String,
}

impl ExperimentDefinition {
    /// Copy of this definition carrying a freshly assigned id.
    pub fn with_new_id(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    /// Injection intensity (0-100) taken from `parameters.intensity`, default 50.
    pub fn intensity(&self) -> u8 {
        self.parameters
            .get("intensity")
            .and_then(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .map(|n| n.min(100) as u8)
            .unwrap_or(50)
    }
}
