//! Continuous verification: run an operation while a checker polls in the
//! background, aborting and reporting on violation.
//!
//! # Modules
//!
//! - [`config`]: `GuardConfig`, `AbortPolicy`
//! - [`checker`]: `Checker` trait, `CheckOutcome`, `ViolationRecord`
//! - [`runner`]: `Guard`, `run_guarded()`, `AbortSignal`, `GuardStats`
//! - [`alert`]: `AlertSink`, `TracingAlertSink`
//! - [`checkers`]: SLO, policy, blast-radius and composite checkers
//! - [`error`]: `GuardError`

pub mod alert;
pub mod checker;
pub mod checkers;
pub mod config;
pub mod error;
pub mod runner;

pub use alert::{AlertSink, TracingAlertSink};
pub use checker::{CheckOutcome, Checker, ViolationRecord};
pub use checkers::{
    AffectedResource, BlastRadiusChecker, CompositeChecker, PolicyChecker, PolicySource,
    RepositoryPolicySource, ResourceDiscovery, SharedPolicy, SloChecker,
};
pub use config::{AbortPolicy, GuardConfig};
pub use error::GuardError;
pub use runner::{run_guarded, AbortSignal, Guard, GuardStats, Guarded};
