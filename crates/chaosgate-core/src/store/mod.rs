//! Persistence of experiment definitions, run plans and reports.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryExperimentRepository;
pub use traits::ExperimentRepository;
