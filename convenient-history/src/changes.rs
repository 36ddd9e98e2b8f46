//! Change detection between two executions
//!
//! Compares the state recorded after the previous execution against the
//! snapshot taken before the current one. Checks run in a fixed order and
//! each one that triggers a rebuild stops the ones after it:
//!
//! 1. previous execution failed
//! 2. implementation changed (or is unknown)
//! 3. input property added or removed
//! 4. input property value changed
//! 5. input files (property set, then per-file diff)
//! 6. output files (property set, then per-file diff)
//!
//! Only steps 5 and 6 diff files, so an implementation or value change never
//! pays for a file comparison and always provides the reported reason.

use crate::change::{diff_properties, Change, ChangeScope};
use crate::properties::TaskIdentity;
use crate::snapshot::{AfterPreviousExecutionState, ExecutionSnapshot, ImplementationSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Default number of rebuild reasons kept for display
pub const MAX_REASONS: usize = 3;

/// Knobs for [`ExecutionStateChanges::detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionOptions {
    /// Task body can process incremental input changes
    pub incremental: bool,
    /// Overlapping outputs were detected; files added to output roots by
    /// someone else are then not reported as output changes
    pub allow_overlapping_outputs: bool,
    /// Upper bound on `rebuild_reasons`
    pub max_reasons: usize,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            incremental: false,
            allow_overlapping_outputs: false,
            max_reasons: MAX_REASONS,
        }
    }
}

/// Differences between the previous and the current execution of a task.
///
/// When `rebuild_required` is set the change lists may be empty or partial and
/// must not be used to drive incremental processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStateChanges {
    /// Input file changes, by property name then path
    pub input_file_changes: Vec<Change>,
    /// Output file changes, by property name then path
    pub output_file_changes: Vec<Change>,
    /// Whether the task must be fully rebuilt
    pub rebuild_required: bool,
    /// Human-readable reasons, most actionable first
    pub rebuild_reasons: Vec<String>,
}

struct Reasons {
    messages: Vec<String>,
    limit: usize,
}

impl Reasons {
    fn push(&mut self, message: String) {
        if self.messages.len() < self.limit {
            self.messages.push(message);
        }
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl ExecutionStateChanges {
    /// Compare `previous` with `current`.
    #[must_use]
    pub fn detect(
        task: &TaskIdentity,
        previous: &AfterPreviousExecutionState,
        current: &ExecutionSnapshot,
        options: DetectionOptions,
    ) -> Self {
        let mut reasons = Reasons {
            messages: Vec::new(),
            limit: options.max_reasons.max(1),
        };
        let last = &previous.snapshot;

        if !previous.successful {
            reasons.push(format!("{} failed in the previous execution.", task_title(task)));
            return Self::rebuild_without_diff(task, reasons);
        }

        implementation_changes(task, last, current, &mut reasons);
        if !reasons.is_empty() {
            return Self::rebuild_without_diff(task, reasons);
        }

        property_set_changes(
            task,
            "Input property",
            &last.input_properties,
            &current.input_properties,
            &mut reasons,
        );
        if !reasons.is_empty() {
            return Self::rebuild_without_diff(task, reasons);
        }

        for (name, value) in &current.input_properties {
            if last.input_properties.get(name) != Some(value) {
                reasons.push(format!("Value of input property '{name}' has changed for {task}"));
            }
        }
        if !reasons.is_empty() {
            return Self::rebuild_without_diff(task, reasons);
        }

        // Input files
        property_set_changes(
            task,
            "Input file property",
            &last.input_file_properties,
            &current.input_file_properties,
            &mut reasons,
        );
        let input_file_changes = diff_properties(
            ChangeScope::Input,
            &last.input_file_properties,
            &current.input_file_properties,
            true,
        );
        if !options.incremental
            && let Some(first) = input_file_changes.first()
        {
            reasons.push(first.to_string());
        }

        // Output files
        property_set_changes(
            task,
            "Output property",
            &last.output_file_properties,
            &current.output_file_properties,
            &mut reasons,
        );
        let output_file_changes = diff_properties(
            ChangeScope::Output,
            &last.output_file_properties,
            &current.output_file_properties,
            !options.allow_overlapping_outputs,
        );
        for change in &output_file_changes {
            reasons.push(change.to_string());
        }

        let rebuild_required = !reasons.is_empty();
        if rebuild_required {
            info!("{} requires rebuild: {}", task_title(task), reasons.messages.join(" "));
        } else if input_file_changes.is_empty() {
            debug!("{} is up to date", task_title(task));
        } else {
            info!(
                "{} can run incrementally with {} input change(s)",
                task_title(task),
                input_file_changes.len()
            );
        }

        Self {
            input_file_changes,
            output_file_changes,
            rebuild_required,
            rebuild_reasons: reasons.messages,
        }
    }

    fn rebuild_without_diff(task: &TaskIdentity, reasons: Reasons) -> Self {
        info!("{} requires rebuild: {}", task_title(task), reasons.messages.join(" "));
        Self {
            input_file_changes: Vec::new(),
            output_file_changes: Vec::new(),
            rebuild_required: true,
            rebuild_reasons: reasons.messages,
        }
    }

    /// No rebuild and no input changes: the task may be skipped
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        !self.rebuild_required && self.input_file_changes.is_empty()
    }

    /// No rebuild but some input changes: the task may run incrementally
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        !self.rebuild_required && !self.input_file_changes.is_empty()
    }

    /// Whether any output file differs from the recorded outputs
    #[must_use]
    pub fn has_output_changes(&self) -> bool {
        !self.output_file_changes.is_empty()
    }
}

fn task_title(task: &TaskIdentity) -> String {
    format!("Task '{}'", task.path())
}

fn implementation_changes(
    task: &TaskIdentity,
    previous: &ExecutionSnapshot,
    current: &ExecutionSnapshot,
    reasons: &mut Reasons,
) {
    let prev = &previous.implementation;
    let cur = &current.implementation;

    if prev.type_name != cur.type_name {
        reasons.push(format!(
            "{} has changed type from '{}' to '{}'.",
            task_title(task),
            prev.type_name,
            cur.type_name
        ));
        return;
    }
    if cur.is_unknown() {
        reasons.push(format!(
            "{} was implemented by code of unknown origin (type '{}').",
            task_title(task),
            cur.type_name
        ));
        return;
    }
    if prev.is_unknown() {
        reasons.push(format!(
            "During the previous execution {task} was implemented by code of unknown origin (type '{}').",
            prev.type_name
        ));
        return;
    }
    if prev.code_hash != cur.code_hash {
        reasons.push(format!("Implementation of {task} has changed."));
        return;
    }

    additional_implementation_changes(
        task,
        &previous.additional_implementations,
        &current.additional_implementations,
        reasons,
    );
}

fn additional_implementation_changes(
    task: &TaskIdentity,
    previous: &[ImplementationSnapshot],
    current: &[ImplementationSnapshot],
    reasons: &mut Reasons,
) {
    if current.iter().any(ImplementationSnapshot::is_unknown) {
        reasons.push(format!(
            "{} has additional actions implemented by code of unknown origin.",
            task_title(task)
        ));
        return;
    }
    if previous.iter().any(ImplementationSnapshot::is_unknown) {
        reasons.push(format!(
            "During the previous execution {task} had additional actions implemented by code of unknown origin."
        ));
        return;
    }
    if previous != current {
        reasons.push(format!("One or more additional actions for {task} have changed."));
    }
}

fn property_set_changes<V>(
    task: &TaskIdentity,
    title: &str,
    previous: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
    reasons: &mut Reasons,
) {
    for name in previous.keys().filter(|name| !current.contains_key(*name)) {
        reasons.push(format!("{title} '{name}' has been removed for {task}"));
    }
    for name in current.keys().filter(|name| !previous.contains_key(*name)) {
        reasons.push(format!("{title} '{name}' has been added for {task}"));
    }
}
