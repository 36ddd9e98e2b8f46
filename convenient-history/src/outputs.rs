//! Index of locations produced by the build
//!
//! Every time a task's execution is persisted, its output locations are
//! recorded here. Cleaning and overlap handling ask whether a path (or one of
//! its ancestors) was generated by some task, as opposed to being a file the
//! user placed there.

use crate::error::{HistoryError, HistoryResult};
use crate::fingerprint::FileCollectionFingerprint;
use crate::history::{acquire_lock, atomic_write};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Records which filesystem locations the build produced
pub trait OutputFilesRepository: Send + Sync {
    /// Record every existing location of the given output fingerprints.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be updated.
    fn record_outputs(&self, outputs: &[&FileCollectionFingerprint]) -> HistoryResult<()>;

    /// Whether `path` or any of its ancestors was recorded as an output.
    fn is_generated_by_build(&self, path: &Path) -> bool;
}

fn is_covered(recorded: &BTreeSet<PathBuf>, path: &Path) -> bool {
    path.ancestors().any(|ancestor| recorded.contains(ancestor))
}

fn collect(outputs: &[&FileCollectionFingerprint]) -> Vec<PathBuf> {
    outputs
        .iter()
        .flat_map(|fingerprint| fingerprint.existing_paths())
        .map(PathBuf::from)
        .collect()
}

/// Output index kept in memory
#[derive(Debug, Default)]
pub struct InMemoryOutputFilesRepository {
    recorded: RwLock<BTreeSet<PathBuf>>,
}

impl InMemoryOutputFilesRepository {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputFilesRepository for InMemoryOutputFilesRepository {
    fn record_outputs(&self, outputs: &[&FileCollectionFingerprint]) -> HistoryResult<()> {
        let mut recorded = self
            .recorded
            .write()
            .map_err(|_| HistoryError::Lock("output index lock poisoned".to_string()))?;
        recorded.extend(collect(outputs));
        Ok(())
    }

    fn is_generated_by_build(&self, path: &Path) -> bool {
        self.recorded
            .read()
            .is_ok_and(|recorded| is_covered(&recorded, path))
    }
}

/// Output index persisted as a JSON list at `<root>/outputs.json`
#[derive(Debug)]
pub struct FileOutputFilesRepository {
    path: PathBuf,
    recorded: RwLock<BTreeSet<PathBuf>>,
}

impl FileOutputFilesRepository {
    /// Open the index under `root`, loading any previously recorded paths
    ///
    /// # Errors
    ///
    /// Returns an error if an existing index cannot be read or parsed.
    pub fn open(root: impl AsRef<Path>) -> HistoryResult<Self> {
        let path = root.as_ref().join("outputs.json");
        let recorded = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| HistoryError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} recorded output location(s) from {}", recorded.len(), path.display());
        Ok(Self {
            path,
            recorded: RwLock::new(recorded),
        })
    }
}

impl OutputFilesRepository for FileOutputFilesRepository {
    fn record_outputs(&self, outputs: &[&FileCollectionFingerprint]) -> HistoryResult<()> {
        let _lock = acquire_lock(&self.path.with_extension("lock"))?;
        let mut recorded = self
            .recorded
            .write()
            .map_err(|_| HistoryError::Lock("output index lock poisoned".to_string()))?;

        let before = recorded.len();
        recorded.extend(collect(outputs));
        if recorded.len() == before {
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(&*recorded)?;
        atomic_write(&self.path, &json)?;
        debug!("Recorded {} new output location(s)", recorded.len() - before);
        Ok(())
    }

    fn is_generated_by_build(&self, path: &Path) -> bool {
        self.recorded
            .read()
            .is_ok_and(|recorded| is_covered(&recorded, path))
    }
}
