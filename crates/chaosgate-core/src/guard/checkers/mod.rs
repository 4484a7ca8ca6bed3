//! Checker strategies for the guard loop.

pub mod blast_radius;
pub mod composite;
pub mod policy;
pub mod slo;

pub use blast_radius::{AffectedResource, BlastRadiusChecker, ResourceDiscovery};
pub use composite::CompositeChecker;
pub use policy::{PolicyChecker, PolicySource, RepositoryPolicySource, SharedPolicy};
pub use slo::SloChecker;
