//! Fault-injection agents and the channel they report progress on.
//!
//! The orchestrator hands an [`AgentCommand`] to a [`FaultAgent`] and returns
//! immediately. The agent reports phase transitions asynchronously through an
//! [`AgentReporter`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::domain::{AgentStatus, RunPlan};

/// Errors handing a command to an agent.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to spawn fault agent `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("fault agent rejected command: {0}")]
    Rejected(String),
}

/// Command derived from a [`RunPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommand {
    pub run_id: String,
    pub fault_type: String,
    pub target: String,
    pub duration_secs: u64,
    /// `dry-run` or `production`.
    pub mode: String,
    pub intensity: u8,
}

impl AgentCommand {
    pub fn from_plan(plan: &RunPlan) -> Self {
        let def = &plan.definition;
        Self {
            run_id: plan.run_id.clone(),
            fault_type: def.fault.agent_arg().to_string(),
            target: def.target.cluster.clone(),
            duration_secs: def.timeout_secs,
            mode: if plan.dry_run { "dry-run" } else { "production" }.to_string(),
            intensity: def.intensity(),
        }
    }

    /// Command-line arguments understood by the fault agent script.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--fault-type".into(),
            self.fault_type.clone(),
            "--target".into(),
            self.target.clone(),
            "--duration".into(),
            self.duration_secs.to_string(),
            "--mode".into(),
            self.mode.clone(),
            "--intensity".into(),
            self.intensity.to_string(),
        ]
    }
}

/// Progress report for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub run_id: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Sending half of the agent update channel.
#[derive(Debug, Clone)]
pub struct AgentReporter {
    tx: mpsc::UnboundedSender<AgentUpdate>,
}

impl AgentReporter {
    pub fn new(tx: mpsc::UnboundedSender<AgentUpdate>) -> Self {
        Self { tx }
    }

    /// Create a reporter together with its receiving half.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send an update. Returns `false` once the receiver is gone.
    pub fn report(
        &self,
        run_id: &str,
        status: AgentStatus,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        self.tx
            .send(AgentUpdate {
                run_id: run_id.to_string(),
                status,
                payload,
            })
            .is_ok()
    }
}

/// External fault-injection mechanism.
#[async_trait]
pub trait FaultAgent: Send + Sync {
    /// Hand off `command`. Returns once the hand-off is done, not when the
    /// fault finishes; progress arrives through `reporter`.
    async fn dispatch(
        &self,
        command: AgentCommand,
        reporter: AgentReporter,
    ) -> Result<(), AgentError>;
}

/// Parse a `STATUS <PHASE> [json]` line emitted by an agent process.
pub fn parse_status_line(
    line: &str,
) -> Option<(AgentStatus, serde_json::Map<String, serde_json::Value>)> {
    let rest = line.trim().strip_prefix("STATUS ")?;
    let (phase, json) = match rest.split_once(char::is_whitespace) {
        Some((phase, json)) => (phase, json.trim()),
        None => (rest, ""),
    };
    let status = phase.parse::<AgentStatus>().ok()?;
    let payload = if json.is_empty() {
        serde_json::Map::new()
    } else {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(other) => {
                let mut map = serde_json::Map::new();
                map.insert("detail".into(), other);
                map
            }
            Err(_) => {
                let mut map = serde_json::Map::new();
                map.insert("detail".into(), serde_json::Value::String(json.to_string()));
                map
            }
        }
    };
    Some((status, payload))
}

/// Runs the configured fault agent program as a child process.
#[derive(Debug, Clone)]
pub struct ProcessFaultAgent {
    config: AgentConfig,
}

impl ProcessFaultAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FaultAgent for ProcessFaultAgent {
    async fn dispatch(
        &self,
        command: AgentCommand,
        reporter: AgentReporter,
    ) -> Result<(), AgentError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .args(command.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Spawn {
                program: self.config.program.clone(),
                reason: e.to_string(),
            })?;

        info!(
            run_id = %command.run_id,
            program = %self.config.program,
            fault_type = %command.fault_type,
            mode = %command.mode,
            "fault agent started"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run_id = command.run_id.clone();

        tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let run_id = run_id.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        warn!(run_id = %run_id, "[fault-agent] {line}");
                    }
                });
            }

            let mut saw_terminal = false;
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parse_status_line(&line) {
                        Some((status, payload)) => {
                            saw_terminal |= status.is_terminal();
                            reporter.report(&run_id, status, payload);
                        }
                        None => debug!(run_id = %run_id, "[fault-agent] {line}"),
                    }
                }
            }

            let (status, payload) = match child.wait().await {
                Ok(exit) => {
                    let mut payload = serde_json::Map::new();
                    payload.insert("exit_code".into(), serde_json::json!(exit.code()));
                    let status = if exit.success() {
                        AgentStatus::Completed
                    } else {
                        AgentStatus::Failed
                    };
                    (status, payload)
                }
                Err(e) => {
                    let mut payload = serde_json::Map::new();
                    payload.insert("error".into(), serde_json::json!(e.to_string()));
                    (AgentStatus::Failed, payload)
                }
            };
            if !saw_terminal {
                reporter.report(&run_id, status, payload);
            }
        });

        Ok(())
    }
}

/// In-process agent that walks through the agent phases on a timer.
///
/// Used for dry runs without an agent program and in tests.
#[derive(Debug, Clone)]
pub struct SimulatedFaultAgent {
    step: Duration,
    final_status: AgentStatus,
}

impl SimulatedFaultAgent {
    pub fn new(step: Duration) -> Self {
        Self {
            step,
            final_status: AgentStatus::Completed,
        }
    }

    pub fn ending_with(mut self, status: AgentStatus) -> Self {
        self.final_status = status;
        self
    }
}

#[async_trait]
impl FaultAgent for SimulatedFaultAgent {
    async fn dispatch(
        &self,
        command: AgentCommand,
        reporter: AgentReporter,
    ) -> Result<(), AgentError> {
        let step = self.step;
        let final_status = self.final_status;
        tokio::spawn(async move {
            for status in [
                AgentStatus::Preparing,
                AgentStatus::Injecting,
                AgentStatus::Observing,
                AgentStatus::Recovering,
            ] {
                if !reporter.report(&command.run_id, status, serde_json::Map::new()) {
                    return;
                }
                tokio::time::sleep(step).await;
            }
            let mut payload = serde_json::Map::new();
            payload.insert("simulated".into(), serde_json::Value::Bool(true));
            reporter.report(&command.run_id, final_status, payload);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExperimentDefinition, FaultKind, TargetSystem};

    fn plan(dry_run: bool) -> RunPlan {
        let mut parameters = serde_json::Map::new();
        parameters.insert("intensity".into(), serde_json::json!(75));
        RunPlan::new(
            ExperimentDefinition {
                id: "exp-1".into(),
                name: "latency".into(),
                fault: FaultKind::NetworkDelay,
                parameters,
                target: TargetSystem::new("staging-cluster", "default"),
                timeout_secs: 120,
                slos: vec![],
                dry_run_allowed: true,
                created_by: "ops".into(),
            },
            dry_run,
        )
    }

    #[test]
    fn command_from_plan() {
        let cmd = AgentCommand::from_plan(&plan(true));
        assert_eq!(cmd.fault_type, "network");
        assert_eq!(cmd.target, "staging-cluster");
        assert_eq!(cmd.duration_secs, 120);
        assert_eq!(cmd.mode, "dry-run");
        assert_eq!(cmd.intensity, 75);
        assert_eq!(
            cmd.to_args(),
            [
                "--fault-type",
                "network",
                "--target",
                "staging-cluster",
                "--duration",
                "120",
                "--mode",
                "dry-run",
                "--intensity",
                "75"
            ]
        );
        assert_eq!(AgentCommand::from_plan(&plan(false)).mode, "production");
    }

    #[test]
    fn status_lines() {
        let (status, payload) = parse_status_line("STATUS INJECTING {\"cpu\": 80}").unwrap();
        assert_eq!(status, AgentStatus::Injecting);
        assert_eq!(payload["cpu"], serde_json::json!(80));

        let (status, payload) = parse_status_line("STATUS completed").unwrap();
        assert_eq!(status, AgentStatus::Completed);
        assert!(payload.is_empty());

        let (_, payload) = parse_status_line("STATUS FAILED boom").unwrap();
        assert_eq!(payload["detail"], serde_json::json!("boom"));

        assert!(parse_status_line("Fault Type: cpu").is_none());
        assert!(parse_status_line("STATUS UNKNOWN").is_none());
    }

    #[tokio::test]
    async fn reporter_detects_closed_channel() {
        let (reporter, rx) = AgentReporter::channel();
        drop(rx);
        assert!(!reporter.report("r", AgentStatus::Preparing, serde_json::Map::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_agent_walks_phases() {
        let (reporter, mut rx) = AgentReporter::channel();
        let agent = SimulatedFaultAgent::new(Duration::from_millis(10));
        agent
            .dispatch(AgentCommand::from_plan(&plan(true)), reporter)
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Some(update) = rx.recv().await {
            seen.push(update.status);
            if update.status.is_terminal() {
                break;
            }
        }
        assert_eq!(
            seen,
            [
                AgentStatus::Preparing,
                AgentStatus::Injecting,
                AgentStatus::Observing,
                AgentStatus::Recovering,
                AgentStatus::Completed
            ]
        );
    }

    async fn updates_until_terminal(
        rx: &mut mpsc::UnboundedReceiver<AgentUpdate>,
    ) -> Vec<AgentUpdate> {
        let mut seen = Vec::new();
        while let Some(update) = rx.recv().await {
            let terminal = update.status.is_terminal();
            seen.push(update);
            if terminal {
                break;
            }
        }
        seen
    }

    fn shell_agent(script: &str) -> ProcessFaultAgent {
        ProcessFaultAgent::new(AgentConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        })
    }

    #[tokio::test]
    async fn process_status_lines_are_forwarded_then_exit_status() {
        let agent = shell_agent(
            "echo 'Fault Type: network'; \
             echo 'STATUS INJECTING {\"affected_pods\": [\"cart-1\"]}'; \
             echo 'STATUS OBSERVING'; exit 0",
        );
        let (reporter, mut rx) = AgentReporter::channel();
        agent
            .dispatch(AgentCommand::from_plan(&plan(true)), reporter)
            .await
            .unwrap();

        let seen = tokio::time::timeout(
            Duration::from_secs(10),
            updates_until_terminal(&mut rx),
        )
        .await
        .unwrap();
        let statuses: Vec<_> = seen.iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            [
                AgentStatus::Injecting,
                AgentStatus::Observing,
                AgentStatus::Completed
            ]
        );
        assert!(seen.iter().all(|u| u.run_id == seen[0].run_id));
        assert_eq!(
            seen[0].payload["affected_pods"],
            serde_json::json!(["cart-1"])
        );
        assert_eq!(seen[2].payload["exit_code"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn process_failure_exit_reports_failed() {
        let agent = shell_agent("echo 'STATUS PREPARING'; exit 3");
        let (reporter, mut rx) = AgentReporter::channel();
        agent
            .dispatch(AgentCommand::from_plan(&plan(false)), reporter)
            .await
            .unwrap();

        let seen = tokio::time::timeout(
            Duration::from_secs(10),
            updates_until_terminal(&mut rx),
        )
        .await
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].status, AgentStatus::Failed);
        assert_eq!(seen[1].payload["exit_code"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn reported_terminal_is_not_repeated_on_exit() {
        let agent =
            shell_agent("echo 'STATUS FAILED {\"reason\": \"target lost\"}'; exit 0");
        let (reporter, mut rx) = AgentReporter::channel();
        agent
            .dispatch(AgentCommand::from_plan(&plan(true)), reporter)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, AgentStatus::Failed);
        assert_eq!(first.payload["reason"], serde_json::json!("target lost"));
        // the reporter is dropped once the child has been reaped
        let rest = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let agent = ProcessFaultAgent::new(AgentConfig {
            program: "/nonexistent/chaosgate-agent".into(),
            args: vec![],
        });
        let (reporter, _rx) = AgentReporter::channel();
        let err = agent
            .dispatch(AgentCommand::from_plan(&plan(true)), reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
    }
}
