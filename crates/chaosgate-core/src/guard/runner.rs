//! The continuous verification loop.
//!
//! [`Guard::run`] captures the checker's baseline, starts the operation and a
//! background monitor task, and decides the outcome once both have stopped.
//! The monitor only ever talks to the operation through the abort flag.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::alert::{AlertSink, TracingAlertSink};
use super::checker::{CheckOutcome, Checker, ViolationRecord};
use super::config::{AbortPolicy, GuardConfig};
use super::error::GuardError;
use crate::metrics::Metrics;
use crate::obs;

/// Monitor statistics for one guarded call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    pub checks: u64,
    pub violations: u64,
    pub check_errors: u64,
    pub aborted: bool,
    /// Monitoring stopped because `max_duration_ms` elapsed.
    pub timed_out: bool,
    /// The monitor task panicked or was cancelled; its counts are lost.
    #[serde(default)]
    pub monitor_failed: bool,
}

/// Read side of the abort flag, handed to the guarded operation.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the monitor raises the abort flag. Never resolves if the
    /// monitor ends without aborting.
    pub async fn aborted(&mut self) {
        if self.rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Successful result of a guarded call.
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    pub stats: GuardStats,
    /// Violations recorded without aborting (`LogOnly` or below the repeat count).
    pub violations: Vec<ViolationRecord>,
}

#[derive(Debug, Default)]
struct MonitorReport {
    stats: GuardStats,
    violations: Vec<ViolationRecord>,
}

impl MonitorReport {
    fn failed() -> Self {
        Self {
            stats: GuardStats {
                check_errors: 1,
                monitor_failed: true,
                ..GuardStats::default()
            },
            violations: Vec::new(),
        }
    }
}

/// Runs operations under continuous verification.
#[derive(Clone)]
pub struct Guard {
    config: GuardConfig,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<Metrics>,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            alerts: Arc::new(TracingAlertSink),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Run `operation` while `checker` is polled in the background.
    ///
    /// With nothing to monitor the operation simply runs. Otherwise, if the
    /// monitor aborts, the operation's result is discarded and a
    /// [`GuardError::Violation`] carrying every recorded violation is
    /// returned. The checker is torn down on every path, after the monitor
    /// has stopped.
    pub async fn run<T, E, F, Fut>(
        &self,
        checker: Arc<dyn Checker>,
        operation: F,
    ) -> Result<Guarded<T>, GuardError<E>>
    where
        F: FnOnce(AbortSignal) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (abort_tx, abort_rx) = watch::channel(false);
        let signal = AbortSignal { rx: abort_rx };

        if !checker.has_targets() {
            debug!(
                kind = checker.kind(),
                subject_id = checker.subject_id(),
                "nothing to monitor; running unguarded"
            );
            let value = operation(signal).await.map_err(GuardError::Operation)?;
            return Ok(Guarded {
                value,
                stats: GuardStats::default(),
                violations: Vec::new(),
            });
        }

        let mut cleanup = Cleanup {
            checker: Arc::clone(&checker),
            monitor: None,
        };
        checker
            .capture_baseline()
            .await
            .map_err(GuardError::Baseline)?;

        let kind = checker.kind().to_string();
        let subject_id = checker.subject_id().to_string();
        obs::emit_guard_started(
            &kind,
            &subject_id,
            self.config.interval_ms,
            self.config.max_duration_ms,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = Monitor {
            checker: Arc::clone(&checker),
            config: self.config,
            alerts: Arc::clone(&self.alerts),
            metrics: Arc::clone(&self.metrics),
            abort_tx,
            stop_rx,
        };
        cleanup.monitor = Some(tokio::spawn(monitor.run()));

        let result = operation(signal).await;

        stop_tx.send_replace(true);
        let report = match cleanup.monitor.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!(kind = %kind, subject_id = %subject_id, error = %e, "guard monitor task failed");
                MonitorReport::failed()
            }),
            None => MonitorReport::default(),
        };
        drop(cleanup);

        let MonitorReport { stats, violations } = report;
        obs::emit_guard_finished(
            &kind,
            &subject_id,
            stats.checks,
            stats.violations,
            stats.aborted,
        );

        if stats.aborted {
            self.metrics.inc_guard_aborts();
            return Err(GuardError::Violation {
                kind,
                subject_id,
                violations,
                stats,
            });
        }

        match result {
            Ok(value) => Ok(Guarded {
                value,
                stats,
                violations,
            }),
            Err(e) => Err(GuardError::Operation(e)),
        }
    }
}

/// Run `operation` guarded by `checker` with default alerting and fresh metrics.
pub async fn run_guarded<T, E, F, Fut>(
    operation: F,
    checker: Arc<dyn Checker>,
    config: GuardConfig,
) -> Result<Guarded<T>, GuardError<E>>
where
    F: FnOnce(AbortSignal) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Guard::new(config).run(checker, operation).await
}

/// Stops the monitor and tears the checker down when dropped, including when
/// the guarded future itself is dropped mid-flight.
struct Cleanup {
    checker: Arc<dyn Checker>,
    monitor: Option<JoinHandle<MonitorReport>>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.take() {
            handle.abort();
        }
        self.checker.teardown();
    }
}

struct Monitor {
    checker: Arc<dyn Checker>,
    config: GuardConfig,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<Metrics>,
    abort_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Monitor {
    async fn run(mut self) -> MonitorReport {
        let started = Instant::now();
        let interval = self.config.interval();
        let max_duration = self.config.max_duration();
        let kind = self.checker.kind().to_string();
        let subject_id = self.checker.subject_id().to_string();
        let mut report = MonitorReport::default();
        // violation times per reporting checker
        let mut recent: HashMap<String, VecDeque<Instant>> = HashMap::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_rx.wait_for(|stop| *stop) => break,
            }
            if started.elapsed() > max_duration {
                info!(kind = %kind, subject_id = %subject_id, "guard max duration reached; monitoring stopped");
                report.stats.timed_out = true;
                break;
            }

            let outcome = match self.checker.check().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.stats.check_errors += 1;
                    warn!(kind = %kind, subject_id = %subject_id, error = %e, "guard check failed");
                    continue;
                }
            };

            report.stats.checks += 1;
            self.metrics.inc_guard_checks();
            obs::emit_guard_check(&kind, &subject_id, report.stats.checks, outcome.is_clear());

            let CheckOutcome::Violated(records) = outcome else {
                continue;
            };
            let mut violated: Vec<String> = Vec::new();
            for record in records {
                report.stats.violations += 1;
                self.metrics.inc_guard_violations();
                obs::emit_guard_violation(&record.checker, &subject_id, &record.summary);
                let alert = self
                    .checker
                    .alert_for(&record.checker)
                    .unwrap_or(self.config.alert_on_breach);
                if alert {
                    self.alerts.alert(&record).await;
                }
                recent
                    .entry(record.checker.clone())
                    .or_default()
                    .push_back(Instant::now());
                if !violated.contains(&record.checker) {
                    violated.push(record.checker.clone());
                }
                report.violations.push(record);
            }

            let abort = violated.iter().any(|checker| {
                let policy = self
                    .checker
                    .abort_policy_for(checker)
                    .unwrap_or(self.config.abort_policy);
                should_abort(policy, recent.entry(checker.clone()).or_default())
            });
            if abort {
                report.stats.aborted = true;
                self.abort_tx.send_replace(true);
                break;
            }
        }
        report
    }
}

fn should_abort(policy: AbortPolicy, recent: &mut VecDeque<Instant>) -> bool {
    match policy {
        AbortPolicy::Abort => true,
        AbortPolicy::LogOnly => false,
        AbortPolicy::AfterRepeated { count, window_ms } => {
            let window = std::time::Duration::from_millis(window_ms);
            while recent.front().is_some_and(|t| t.elapsed() >= window) {
                recent.pop_front();
            }
            recent.len() >= count.max(1)
        }
    }
}
