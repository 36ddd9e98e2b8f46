//! Incremental input views handed to the task body
//!
//! A task that supports incremental execution asks which of its input files
//! are out of date and which were removed. When a full rebuild is needed the
//! view reports every current input file as added and nothing as removed.

use crate::change::{Change, ChangeKind, ChangeScope};
use crate::error::IncrementalInputsError;
use crate::fingerprint::FileCollectionFingerprint;
use std::cell::Cell;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Fresh,
    OutOfDateVisited,
    RemovedVisited,
}

/// Input file changes as seen by the task body.
///
/// [`out_of_date`](Self::out_of_date) and [`removed`](Self::removed) may each
/// be called once per execution, in that order.
#[derive(Debug)]
pub struct IncrementalTaskInputs {
    incremental: bool,
    changes: Vec<Change>,
    visit: Cell<Visit>,
}

impl IncrementalTaskInputs {
    /// View reporting every existing current input file as added
    #[must_use]
    pub fn rebuild(current_inputs: &BTreeMap<String, FileCollectionFingerprint>) -> Self {
        let changes = current_inputs
            .iter()
            .flat_map(|(property, fingerprint)| {
                fingerprint.existing_paths().map(move |path| Change {
                    kind: ChangeKind::Added,
                    scope: ChangeScope::Input,
                    property: property.clone(),
                    path: path.to_string(),
                })
            })
            .collect();
        Self {
            incremental: false,
            changes,
            visit: Cell::new(Visit::Fresh),
        }
    }

    /// View reporting exactly the detected input file changes
    #[must_use]
    pub fn changes_only(changes: Vec<Change>) -> Self {
        Self {
            incremental: true,
            changes,
            visit: Cell::new(Visit::Fresh),
        }
    }

    /// `false` when every input must be processed from scratch
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// All changes in this view, without consuming the one-shot visitors
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Visit every added or modified input file.
    ///
    /// # Errors
    ///
    /// Fails if called a second time.
    pub fn out_of_date<F>(&self, mut action: F) -> Result<(), IncrementalInputsError>
    where
        F: FnMut(&Change),
    {
        if self.visit.get() != Visit::Fresh {
            return Err(IncrementalInputsError::OutOfDateAlreadyVisited);
        }
        self.visit.set(Visit::OutOfDateVisited);
        self.changes.iter().filter(|c| !c.is_removed()).for_each(|c| action(c));
        Ok(())
    }

    /// Visit every removed input file.
    ///
    /// # Errors
    ///
    /// Fails unless [`out_of_date`](Self::out_of_date) was called first, or if
    /// called a second time.
    pub fn removed<F>(&self, mut action: F) -> Result<(), IncrementalInputsError>
    where
        F: FnMut(&Change),
    {
        match self.visit.get() {
            Visit::Fresh => return Err(IncrementalInputsError::RemovedBeforeOutOfDate),
            Visit::RemovedVisited => return Err(IncrementalInputsError::RemovedAlreadyVisited),
            Visit::OutOfDateVisited => {}
        }
        self.visit.set(Visit::RemovedVisited);
        self.changes.iter().filter(|c| c.is_removed()).for_each(|c| action(c));
        Ok(())
    }
}
