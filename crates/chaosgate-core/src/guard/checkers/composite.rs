//! Several checkers behind one guard loop, each polled on its own interval.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::time::Instant;

use crate::domain::ChaosError;
use crate::guard::{AbortPolicy, CheckOutcome, Checker, GuardConfig};

struct Member {
    checker: Arc<dyn Checker>,
    interval: Duration,
    abort_policy: Option<AbortPolicy>,
    alert: Option<bool>,
    next_due: Mutex<Option<Instant>>,
}

impl Member {
    /// Claims the member's slot if it is due at `now`.
    fn claim(&self, now: Instant) -> bool {
        let mut next = self.next_due.lock().unwrap_or_else(PoisonError::into_inner);
        match *next {
            Some(due) if now < due => false,
            _ => {
                *next = Some(now + self.interval);
                true
            }
        }
    }
}

/// Drive the guard loop at [`CompositeChecker::tick_interval`]; members whose
/// own interval has not elapsed are skipped on that tick.
pub struct CompositeChecker {
    subject_id: String,
    members: Vec<Member>,
}

impl CompositeChecker {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            members: Vec::new(),
        }
    }

    /// Adds a member polled every `interval` under the driving guard's abort
    /// policy and alerting.
    pub fn with(mut self, checker: Arc<dyn Checker>, interval: Duration) -> Self {
        self.members.push(Member {
            checker,
            interval,
            abort_policy: None,
            alert: None,
            next_due: Mutex::new(None),
        });
        self
    }

    /// Adds a member that keeps its own interval, abort policy and alerting
    /// from `config`.
    pub fn with_guard(mut self, checker: Arc<dyn Checker>, config: &GuardConfig) -> Self {
        self.members.push(Member {
            checker,
            interval: config.interval(),
            abort_policy: Some(config.abort_policy),
            alert: Some(config.alert_on_breach),
            next_due: Mutex::new(None),
        });
        self
    }

    /// Shortest interval among members that have something to monitor.
    pub fn tick_interval(&self) -> Option<Duration> {
        self.active().map(|m| m.interval).min()
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.active().map(|m| m.checker.kind()).collect()
    }

    fn active(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.checker.has_targets())
    }

    fn member(&self, kind: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.checker.kind() == kind)
    }
}

#[async_trait]
impl Checker for CompositeChecker {
    fn kind(&self) -> &str {
        "composite"
    }

    fn subject_id(&self) -> &str {
        &self.subject_id
    }

    fn has_targets(&self) -> bool {
        self.active().next().is_some()
    }

    /// All members capture or none do: on failure the members that already
    /// captured are torn down again.
    async fn capture_baseline(&self) -> Result<(), ChaosError> {
        let now = Instant::now();
        let mut captured: Vec<&Member> = Vec::new();
        for member in self.active() {
            if let Err(e) = member.checker.capture_baseline().await {
                for done in captured {
                    done.checker.teardown();
                }
                return Err(e);
            }
            *member
                .next_due
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(now + member.interval);
            captured.push(member);
        }
        Ok(())
    }

    /// Violations from any member win over errors from others; an error is
    /// only returned when nothing was violated.
    async fn check(&self) -> Result<CheckOutcome, ChaosError> {
        let now = Instant::now();
        let due: Vec<&Member> = self.active().filter(|m| m.claim(now)).collect();
        let outcomes = join_all(due.iter().map(|m| m.checker.check())).await;

        let mut records = Vec::new();
        let mut first_error = None;
        for (member, outcome) in due.iter().zip(outcomes) {
            match outcome {
                Ok(CheckOutcome::Clear) => {}
                Ok(CheckOutcome::Violated(found)) => records.extend(found),
                Err(e) => {
                    tracing::warn!(
                        subject_id = %self.subject_id,
                        kind = member.checker.kind(),
                        error = %e,
                        "member check failed"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match (records.is_empty(), first_error) {
            (false, _) => Ok(CheckOutcome::Violated(records)),
            (true, Some(e)) => Err(e),
            (true, None) => Ok(CheckOutcome::Clear),
        }
    }

    fn teardown(&self) {
        for member in &self.members {
            member.checker.teardown();
        }
    }

    fn abort_policy_for(&self, checker: &str) -> Option<AbortPolicy> {
        let member = self.member(checker)?;
        member
            .abort_policy
            .or_else(|| member.checker.abort_policy_for(checker))
    }

    fn alert_for(&self, checker: &str) -> Option<bool> {
        let member = self.member(checker)?;
        member.alert.or_else(|| member.checker.alert_for(checker))
    }
}
