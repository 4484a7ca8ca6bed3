//! Guard loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the loop does when a check reports a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Abort on the first violation.
    Abort,
    /// Record and keep monitoring.
    LogOnly,
    /// Abort once `count` violations were seen within `window_ms`.
    AfterRepeated { count: usize, window_ms: u64 },
}

/// Configuration for one guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Delay between checks (milliseconds). The first check runs one interval
    /// after the operation starts.
    pub interval_ms: u64,
    /// Monitoring stops after this long; the operation keeps running.
    pub max_duration_ms: u64,
    pub abort_policy: AbortPolicy,
    pub alert_on_breach: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::slo()
    }
}

impl GuardConfig {
    /// SLO monitoring: every 15 s for up to 10 minutes.
    pub fn slo() -> Self {
        Self {
            interval_ms: 15_000,
            max_duration_ms: 600_000,
            abort_policy: AbortPolicy::Abort,
            alert_on_breach: true,
        }
    }

    /// Policy consistency: every 60 s.
    pub fn policy() -> Self {
        Self {
            interval_ms: 60_000,
            ..Self::slo()
        }
    }

    /// Blast radius: every 10 s.
    pub fn blast_radius() -> Self {
        Self {
            interval_ms: 10_000,
            ..Self::slo()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}
