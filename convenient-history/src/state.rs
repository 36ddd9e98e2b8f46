//! Per-execution artifact state of one task
//!
//! A [`TaskArtifactState`] lives for a single execution attempt. The scheduler
//! asks it for changes (which drives the up-to-date check and the incremental
//! input view), runs the task body, then asks it to fingerprint the produced
//! outputs and persist them as the new history entry.

use crate::cache_key::{CacheKey, TaskCacheKeyCalculator};
use crate::change::{diff_properties, ChangeScope};
use crate::changes::{DetectionOptions, ExecutionStateChanges};
use crate::error::{HistoryResult, SnapshotError};
use crate::fingerprint::{FileCollectionFingerprint, FileType, FingerprinterRegistry};
use crate::history::ExecutionHistoryStore;
use crate::incremental::IncrementalTaskInputs;
use crate::outputs::OutputFilesRepository;
use crate::overlap::OverlappingOutputs;
use crate::properties::{TaskIdentity, TaskProperties};
use crate::snapshot::{
    fingerprint_outputs, AfterPreviousExecutionState, BeforeExecutionState, ExecutionSnapshot,
    ImplementationSnapshot, OriginMetadata,
};
use std::cell::{Cell, OnceCell};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle state of one task execution attempt.
///
/// Not shared between threads: change detection is memoised in a `OnceCell`.
pub struct TaskArtifactState {
    task: TaskIdentity,
    properties: TaskProperties,
    registry: Arc<FingerprinterRegistry>,
    history: Arc<dyn ExecutionHistoryStore>,
    output_files: Arc<dyn OutputFilesRepository>,
    cache_key_calculator: TaskCacheKeyCalculator,
    max_reasons: usize,
    outputs_removed: Cell<bool>,
    changes: OnceCell<Option<ExecutionStateChanges>>,
}

impl TaskArtifactState {
    pub(crate) fn new(
        task: TaskIdentity,
        properties: TaskProperties,
        registry: Arc<FingerprinterRegistry>,
        history: Arc<dyn ExecutionHistoryStore>,
        output_files: Arc<dyn OutputFilesRepository>,
        cache_key_calculator: TaskCacheKeyCalculator,
        max_reasons: usize,
    ) -> Self {
        Self {
            task,
            properties,
            registry,
            history,
            output_files,
            cache_key_calculator,
            max_reasons,
            outputs_removed: Cell::new(false),
            changes: OnceCell::new(),
        }
    }

    /// The task this state belongs to
    #[must_use]
    pub fn task(&self) -> &TaskIdentity {
        &self.task
    }

    /// The task's declared properties
    #[must_use]
    pub fn properties(&self) -> &TaskProperties {
        &self.properties
    }

    /// Capture the snapshot of the task before its body runs.
    ///
    /// # Errors
    ///
    /// See [`ExecutionSnapshot::capture`].
    pub fn snapshot_before_execution<V>(
        &self,
        implementation: ImplementationSnapshot,
        additional_implementations: Vec<ImplementationSnapshot>,
        values: V,
        previous: Option<&AfterPreviousExecutionState>,
    ) -> Result<BeforeExecutionState, SnapshotError>
    where
        V: IntoIterator<Item = (String, serde_json::Value)>,
    {
        ExecutionSnapshot::capture(
            implementation,
            additional_implementations,
            values,
            &self.properties,
            &self.registry,
            previous,
        )
    }

    /// Changes since the previous execution.
    ///
    /// `None` when there is no previous execution or the outputs were removed
    /// before the task. Computed on the first call; later calls return the
    /// same result whatever they are passed.
    pub fn execution_state_changes(
        &self,
        previous: Option<&AfterPreviousExecutionState>,
        current: &BeforeExecutionState,
    ) -> Option<&ExecutionStateChanges> {
        self.changes
            .get_or_init(|| {
                if self.outputs_removed.get() {
                    debug!("Outputs of {} were removed, ignoring history", self.task);
                    return None;
                }
                let Some(previous) = previous else {
                    debug!("No history is available for {}", self.task);
                    return None;
                };
                let overlapping = self.overlapping_outputs(Some(previous), current).is_some();
                Some(ExecutionStateChanges::detect(
                    &self.task,
                    previous,
                    current,
                    DetectionOptions {
                        incremental: self.properties.is_incremental(),
                        allow_overlapping_outputs: overlapping,
                        max_reasons: self.max_reasons,
                    },
                ))
            })
            .as_ref()
    }

    /// Input view for the task body.
    ///
    /// Without usable changes, or when a rebuild is required, every current
    /// input file is reported as added.
    pub fn input_changes(
        &self,
        previous: Option<&AfterPreviousExecutionState>,
        current: &BeforeExecutionState,
    ) -> IncrementalTaskInputs {
        match self.execution_state_changes(previous, current) {
            Some(changes) if !changes.rebuild_required => {
                IncrementalTaskInputs::changes_only(changes.input_file_changes.clone())
            }
            _ => IncrementalTaskInputs::rebuild(&current.input_file_properties),
        }
    }

    /// First output location that another producer created or rewrote since
    /// the previous execution.
    #[must_use]
    pub fn overlapping_outputs(
        &self,
        previous: Option<&AfterPreviousExecutionState>,
        current: &BeforeExecutionState,
    ) -> Option<OverlappingOutputs> {
        OverlappingOutputs::detect(
            previous.map(|p| &p.snapshot.output_file_properties),
            &current.output_file_properties,
        )
    }

    /// Build cache key for the current execution
    #[must_use]
    pub fn calculate_cache_key(
        &self,
        current: &BeforeExecutionState,
        properties: &TaskProperties,
    ) -> CacheKey {
        self.cache_key_calculator.calculate(&self.task, current, properties)
    }

    /// Whether results may be loaded from a build cache
    #[must_use]
    pub fn is_allowed_to_use_cached_results(&self) -> bool {
        true
    }

    /// Record that the task's outputs were deleted before it runs.
    ///
    /// Takes effect only before changes are first computed.
    pub fn after_outputs_removed_before_task(&self) {
        self.outputs_removed.set(true);
    }

    /// Fingerprint the declared outputs after the task body ran.
    ///
    /// When outputs overlap with another producer, each property keeps only
    /// the locations this task owns: those that were created or changed
    /// during execution, and those it already produced last time.
    ///
    /// # Errors
    ///
    /// Returns an error if an output root cannot be fingerprinted.
    pub fn snapshot_after_task_execution(
        &self,
        previous: Option<&AfterPreviousExecutionState>,
        current: &BeforeExecutionState,
    ) -> HistoryResult<BTreeMap<String, FileCollectionFingerprint>> {
        let after_execution = fingerprint_outputs(&self.properties, &self.registry, previous)?;

        if self.overlapping_outputs(previous, current).is_none() {
            return Ok(after_execution);
        }

        let empty = FileCollectionFingerprint::EMPTY;
        let filtered = after_execution
            .into_iter()
            .map(|(name, after)| {
                let before = current.output_file_properties.get(&name).unwrap_or(&empty);
                let after_previous = previous
                    .and_then(|p| p.snapshot.output_file_properties.get(&name))
                    .unwrap_or(&empty);
                let owned = after.filter(|path, fingerprint| {
                    if fingerprint.file_type == FileType::Missing {
                        return false;
                    }
                    match before.get(path) {
                        None => true,
                        Some(existing) => {
                            existing.normalized_content_hash != fingerprint.normalized_content_hash
                                || after_previous.get(path).is_some()
                        }
                    }
                });
                debug!(
                    "Kept {} of {} output location(s) of property '{name}' for {}",
                    owned.len(),
                    after.len(),
                    self.task
                );
                (name, owned)
            })
            .collect();
        Ok(filtered)
    }

    /// Store the new history entry if it carries information.
    ///
    /// A failed execution is only recorded when there was no history or when
    /// it changed the outputs; otherwise the previous successful entry stays.
    /// Returns whether an entry was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store or the output index fails.
    pub fn persist_new_outputs(
        &self,
        previous: Option<&AfterPreviousExecutionState>,
        current: &BeforeExecutionState,
        new_outputs: BTreeMap<String, FileCollectionFingerprint>,
        successful: bool,
        origin: OriginMetadata,
    ) -> HistoryResult<bool> {
        let outputs_changed = previous.is_none_or(|p| {
            has_any_output_file_changes(&p.snapshot.output_file_properties, &new_outputs)
        });

        if !successful && !outputs_changed {
            info!("Keeping previous history of {}: failed without changing outputs", self.task);
            return Ok(false);
        }

        let recorded: Vec<FileCollectionFingerprint> = new_outputs.values().cloned().collect();
        let snapshot = ExecutionSnapshot {
            implementation: current.implementation.clone(),
            additional_implementations: current.additional_implementations.clone(),
            input_properties: current.input_properties.clone(),
            input_file_properties: current.input_file_properties.clone(),
            output_file_properties: new_outputs,
        };
        self.history.store(self.task.path(), origin, snapshot, successful)?;
        self.output_files.record_outputs(&recorded.iter().collect::<Vec<_>>())?;
        Ok(true)
    }
}

fn has_any_output_file_changes(
    previous: &BTreeMap<String, FileCollectionFingerprint>,
    current: &BTreeMap<String, FileCollectionFingerprint>,
) -> bool {
    !previous.keys().eq(current.keys())
        || !diff_properties(ChangeScope::Output, previous, current, true).is_empty()
}

impl std::fmt::Debug for TaskArtifactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskArtifactState")
            .field("task", &self.task)
            .field("outputs_removed", &self.outputs_removed.get())
            .field("changes", &self.changes.get())
            .finish_non_exhaustive()
    }
}
