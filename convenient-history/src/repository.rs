//! Factory for per-execution task state

use crate::cache_key::TaskCacheKeyCalculator;
use crate::changes::MAX_REASONS;
use crate::config::HistoryConfig;
use crate::error::HistoryResult;
use crate::fingerprint::FingerprinterRegistry;
use crate::history::{
    ExecutionHistoryStore, FileExecutionHistoryStore, InMemoryExecutionHistoryStore,
};
use crate::outputs::{
    FileOutputFilesRepository, InMemoryOutputFilesRepository, OutputFilesRepository,
};
use crate::properties::{TaskIdentity, TaskProperties};
use crate::snapshot::AfterPreviousExecutionState;
use crate::state::TaskArtifactState;
use std::sync::Arc;
use tracing::info;

/// Hands out a fresh [`TaskArtifactState`] for every task execution attempt.
///
/// The collaborators are shared; the repository itself holds no per-task state.
#[derive(Clone)]
pub struct TaskArtifactStateRepository {
    registry: Arc<FingerprinterRegistry>,
    history: Arc<dyn ExecutionHistoryStore>,
    output_files: Arc<dyn OutputFilesRepository>,
    cache_key_calculator: TaskCacheKeyCalculator,
    max_reasons: usize,
}

impl TaskArtifactStateRepository {
    /// Create a repository from its collaborators
    #[must_use]
    pub fn new(
        registry: Arc<FingerprinterRegistry>,
        history: Arc<dyn ExecutionHistoryStore>,
        output_files: Arc<dyn OutputFilesRepository>,
        cache_key_calculator: TaskCacheKeyCalculator,
    ) -> Self {
        Self {
            registry,
            history,
            output_files,
            cache_key_calculator,
            max_reasons: MAX_REASONS,
        }
    }

    /// Repository with in-memory history and output index
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(FingerprinterRegistry::new()),
            Arc::new(InMemoryExecutionHistoryStore::new()),
            Arc::new(InMemoryOutputFilesRepository::new()),
            TaskCacheKeyCalculator::new(),
        )
    }

    /// Open file-backed history as configured
    ///
    /// # Errors
    ///
    /// Returns an error if the history directory or output index cannot be opened.
    pub fn open(config: &HistoryConfig) -> HistoryResult<Self> {
        let history = Arc::new(FileExecutionHistoryStore::new(&config.root)?);
        let output_files: Arc<dyn OutputFilesRepository> = if config.persist_output_index {
            Arc::new(FileOutputFilesRepository::open(&config.root)?)
        } else {
            Arc::new(InMemoryOutputFilesRepository::new())
        };
        info!("Using execution history at {}", config.root.display());

        let mut repository = Self::new(
            Arc::new(FingerprinterRegistry::new()),
            history,
            output_files,
            TaskCacheKeyCalculator::new(),
        );
        repository.max_reasons = config.max_reasons;
        Ok(repository)
    }

    /// State for one execution attempt of `task`
    #[must_use]
    pub fn get_state_for(
        &self,
        task: &TaskIdentity,
        properties: &TaskProperties,
    ) -> TaskArtifactState {
        TaskArtifactState::new(
            task.clone(),
            properties.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.history),
            Arc::clone(&self.output_files),
            self.cache_key_calculator,
            self.max_reasons,
        )
    }

    /// The execution recorded for `task`, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the history entry exists but cannot be read.
    pub fn load_previous(
        &self,
        task: &TaskIdentity,
    ) -> HistoryResult<Option<AfterPreviousExecutionState>> {
        self.history.load(task.path())
    }

    /// Shared history store
    #[must_use]
    pub fn history(&self) -> &Arc<dyn ExecutionHistoryStore> {
        &self.history
    }

    /// Shared output index
    #[must_use]
    pub fn output_files(&self) -> &Arc<dyn OutputFilesRepository> {
        &self.output_files
    }

    /// Shared fingerprinter registry
    #[must_use]
    pub fn registry(&self) -> &Arc<FingerprinterRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for TaskArtifactStateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskArtifactStateRepository")
            .field("registry", &self.registry)
            .field("max_reasons", &self.max_reasons)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ImplementationSnapshot;
    use tempfile::TempDir;

    #[test]
    fn test_each_attempt_gets_fresh_state() {
        let repository = TaskArtifactStateRepository::in_memory();
        let task = TaskIdentity::new(":noop");
        let properties = TaskProperties::default();

        let first = repository.get_state_for(&task, &properties);
        first.after_outputs_removed_before_task();
        let current = first
            .snapshot_before_execution(
                ImplementationSnapshot::from_source("Noop", ""),
                vec![],
                vec![],
                None,
            )
            .unwrap();
        assert!(first.execution_state_changes(None, &current).is_none());

        let second = repository.get_state_for(&task, &properties);
        assert_eq!(second.task(), &task);
        assert!(repository.load_previous(&task).unwrap().is_none());
    }

    #[test]
    fn test_open_file_backed() {
        let tmp = TempDir::new().unwrap();
        let config = HistoryConfig::default().with_root(tmp.path()).with_max_reasons(5);
        let repository = TaskArtifactStateRepository::open(&config).unwrap();
        assert!(repository.history().task_paths().unwrap().is_empty());
        assert!(tmp.path().join("history").is_dir());
    }
}
