//! Repository abstraction for experiments, run plans and reports.
//!
//! Last write wins; no transactional semantics. An in-memory implementation
//! lives in [`super::memory`].

use async_trait::async_trait;

use super::error::StorageResult;
use crate::domain::{ExperimentDefinition, Report, RunPlan};

#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    // ---------------------------------------------------------------------
    // Definitions
    // ---------------------------------------------------------------------

    /// Store a definition under its id, replacing any previous version.
    async fn save_definition(&self, definition: &ExperimentDefinition) -> StorageResult<()>;

    async fn find_definition(&self, id: &str) -> StorageResult<Option<ExperimentDefinition>>;

    /// All stored definitions, ordered by id.
    async fn find_all(&self) -> StorageResult<Vec<ExperimentDefinition>>;

    /// Delete a definition. Returns `false` if it did not exist.
    async fn delete_by_id(&self, id: &str) -> StorageResult<bool>;

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    async fn save_run_plan(&self, plan: &RunPlan) -> StorageResult<()>;

    async fn find_run_plan(&self, run_id: &str) -> StorageResult<Option<RunPlan>>;

    /// Run plans of one experiment, oldest first.
    async fn runs_for_experiment(&self, experiment_id: &str) -> StorageResult<Vec<RunPlan>>;

    // ---------------------------------------------------------------------
    // Reports
    // ---------------------------------------------------------------------

    async fn save_report(&self, report: &Report) -> StorageResult<()>;

    async fn find_report(&self, run_id: &str) -> StorageResult<Option<Report>>;
}
