//! In-memory experiment repository.
//!
//! Backed by locked `HashMap`s; suitable for tests and single-process use.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::traits::ExperimentRepository;
use crate::domain::{ExperimentDefinition, Report, RunPlan};

#[derive(Debug, Default)]
struct Tables {
    definitions: HashMap<String, ExperimentDefinition>,
    plans: HashMap<String, RunPlan>,
    reports: HashMap<String, Report>,
}

/// Repository keeping every record in process memory.
#[derive(Debug, Default)]
pub struct InMemoryExperimentRepository {
    tables: Mutex<Tables>,
}

impl InMemoryExperimentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn save_definition(&self, definition: &ExperimentDefinition) -> StorageResult<()> {
        if definition.id.is_empty() {
            return Err(StorageError::MissingId { kind: "experiment" });
        }
        self.tables()
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn find_definition(&self, id: &str) -> StorageResult<Option<ExperimentDefinition>> {
        Ok(self.tables().definitions.get(id).cloned())
    }

    async fn find_all(&self) -> StorageResult<Vec<ExperimentDefinition>> {
        let mut all: Vec<_> = self.tables().definitions.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete_by_id(&self, id: &str) -> StorageResult<bool> {
        Ok(self.tables().definitions.remove(id).is_some())
    }

    async fn save_run_plan(&self, plan: &RunPlan) -> StorageResult<()> {
        if plan.run_id.is_empty() {
            return Err(StorageError::MissingId { kind: "run plan" });
        }
        self.tables().plans.insert(plan.run_id.clone(), plan.clone());
        Ok(())
    }

    async fn find_run_plan(&self, run_id: &str) -> StorageResult<Option<RunPlan>> {
        Ok(self.tables().plans.get(run_id).cloned())
    }

    async fn runs_for_experiment(&self, experiment_id: &str) -> StorageResult<Vec<RunPlan>> {
        let mut runs: Vec<_> = self
            .tables()
            .plans
            .values()
            .filter(|p| p.definition.id == experiment_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }

    async fn save_report(&self, report: &Report) -> StorageResult<()> {
        self.tables()
            .reports
            .insert(report.run_id.clone(), report.clone());
        Ok(())
    }

    async fn find_report(&self, run_id: &str) -> StorageResult<Option<Report>> {
        Ok(self.tables().reports.get(run_id).cloned())
    }
}
