//! Execution history persistence
//!
//! Maps a task path to the state recorded after its most recent qualifying
//! execution. The file-backed store keeps one JSON document per task and
//! replaces it with the write-fsync-rename pattern, so a crash mid-write
//! leaves the previous entry intact.

use crate::error::{HistoryError, HistoryResult};
use crate::hash::ContentHash;
use crate::snapshot::{AfterPreviousExecutionState, ExecutionSnapshot, OriginMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Version of the persisted entry layout
pub const HISTORY_FORMAT_VERSION: u32 = 1;

/// Temp files younger than this may belong to a live writer
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// A persisted history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Layout version
    pub format_version: u32,
    /// Task path the entry belongs to
    pub task_path: String,
    /// When the entry was written, in milliseconds since the Unix epoch
    pub stored_at_millis: u64,
    /// Recorded state
    pub state: AfterPreviousExecutionState,
}

impl HistoryRecord {
    fn new(task_path: &str, state: AfterPreviousExecutionState) -> Self {
        let stored_at_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self {
            format_version: HISTORY_FORMAT_VERSION,
            task_path: task_path.to_string(),
            stored_at_millis,
            state,
        }
    }

    /// When the entry was written
    #[must_use]
    pub fn stored_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.stored_at_millis)
    }
}

/// Persistent map from task path to its most recent recorded execution.
///
/// Implementations must allow concurrent reads and writes of different task
/// paths, and must never expose a partially written entry.
pub trait ExecutionHistoryStore: Send + Sync {
    /// Load the full record for a task; `Ok(None)` if nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be read or trusted.
    fn load_record(&self, task_path: &str) -> HistoryResult<Option<HistoryRecord>>;

    /// Replace the recorded execution of a task.
    ///
    /// `snapshot` holds the before-execution implementation and inputs
    /// together with the outputs as fingerprinted after execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be written; the previous entry is
    /// then still in place.
    fn store(
        &self,
        task_path: &str,
        origin: OriginMetadata,
        snapshot: ExecutionSnapshot,
        successful: bool,
    ) -> HistoryResult<()>;

    /// Forget a task; returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be removed.
    fn remove(&self, task_path: &str) -> HistoryResult<bool>;

    /// All task paths with a recorded execution, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    fn task_paths(&self) -> HistoryResult<Vec<String>>;

    /// Load the recorded execution of a task; `Ok(None)` if nothing is recorded.
    ///
    /// # Errors
    ///
    /// Same as [`ExecutionHistoryStore::load_record`].
    fn load(&self, task_path: &str) -> HistoryResult<Option<AfterPreviousExecutionState>> {
        Ok(self.load_record(task_path)?.map(|record| record.state))
    }
}

/// History kept in memory, for tests and single-process tools
#[derive(Debug, Default)]
pub struct InMemoryExecutionHistoryStore {
    entries: RwLock<HashMap<String, HistoryRecord>>,
}

impl InMemoryExecutionHistoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> HistoryError {
    HistoryError::Lock("history lock poisoned".to_string())
}

impl ExecutionHistoryStore for InMemoryExecutionHistoryStore {
    fn load_record(&self, task_path: &str) -> HistoryResult<Option<HistoryRecord>> {
        Ok(self.entries.read().map_err(poisoned)?.get(task_path).cloned())
    }

    fn store(
        &self,
        task_path: &str,
        origin: OriginMetadata,
        snapshot: ExecutionSnapshot,
        successful: bool,
    ) -> HistoryResult<()> {
        let record = HistoryRecord::new(
            task_path,
            AfterPreviousExecutionState {
                snapshot,
                successful,
                origin,
            },
        );
        let _ = self
            .entries
            .write()
            .map_err(poisoned)?
            .insert(task_path.to_string(), record);
        Ok(())
    }

    fn remove(&self, task_path: &str) -> HistoryResult<bool> {
        Ok(self.entries.write().map_err(poisoned)?.remove(task_path).is_some())
    }

    fn task_paths(&self) -> HistoryResult<Vec<String>> {
        let mut paths: Vec<String> =
            self.entries.read().map_err(poisoned)?.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}

/// Write data to a file atomically with fsync for durability
///
/// 1. Write data to a temporary file
/// 2. fsync the temp file
/// 3. Rename temp file to final destination (atomic on POSIX)
/// 4. fsync the parent directory so the new directory entry is durable
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> HistoryResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;

    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        // Not supported on every filesystem
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Acquire an exclusive lock on a file
///
/// The lock is released when the returned handle is dropped.
#[cfg(unix)]
#[allow(deprecated)]
pub(crate) fn acquire_lock(path: &Path) -> HistoryResult<File> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    flock(lock_file.as_raw_fd(), FlockArg::LockExclusive)
        .map_err(|e| HistoryError::Lock(format!("Failed to lock {}: {e}", path.display())))?;

    Ok(lock_file)
}

#[cfg(not(unix))]
pub(crate) fn acquire_lock(path: &Path) -> HistoryResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).truncate(false).write(true).open(path)?)
}

/// History persisted as one JSON file per task under `<root>/history`
#[derive(Debug, Clone)]
pub struct FileExecutionHistoryStore {
    root: PathBuf,
}

impl FileExecutionHistoryStore {
    /// Create or open a store rooted at `root`
    ///
    /// Temp files left behind by writes interrupted more than an hour ago are
    /// removed. Lock files stay in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or scanned.
    pub fn new(root: impl Into<PathBuf>) -> HistoryResult<Self> {
        let root = root.into();
        let store = Self { root };
        fs::create_dir_all(store.history_dir())?;
        store.remove_leftovers();
        debug!("Opened execution history at {}", store.root.display());
        Ok(store)
    }

    /// Directory holding the store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }

    fn entry_path(&self, task_path: &str) -> PathBuf {
        let key = ContentHash::from_bytes(task_path.as_bytes());
        let hex = key.as_str();
        self.history_dir().join(&hex[0..2]).join(format!("{hex}.json"))
    }

    fn remove_leftovers(&self) {
        for entry in walkdir::WalkDir::new(self.history_dir())
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|s| s.to_str()) != Some("tmp")
            {
                continue;
            }
            let stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= STALE_TEMP_AGE);
            if stale {
                debug!("Removing interrupted write {}", entry.path().display());
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    fn read_record(path: &Path) -> HistoryResult<Option<HistoryRecord>> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: HistoryRecord = serde_json::from_str(&json).map_err(|e| HistoryError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if record.format_version != HISTORY_FORMAT_VERSION {
            return Err(HistoryError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {}", record.format_version),
            });
        }
        Ok(Some(record))
    }
}

impl ExecutionHistoryStore for FileExecutionHistoryStore {
    fn load_record(&self, task_path: &str) -> HistoryResult<Option<HistoryRecord>> {
        let path = self.entry_path(task_path);
        let Some(record) = Self::read_record(&path)? else {
            debug!("No execution history for '{task_path}'");
            return Ok(None);
        };
        if record.task_path != task_path {
            return Err(HistoryError::Corrupt {
                path,
                reason: format!("entry belongs to '{}', expected '{task_path}'", record.task_path),
            });
        }
        Ok(Some(record))
    }

    fn store(
        &self,
        task_path: &str,
        origin: OriginMetadata,
        snapshot: ExecutionSnapshot,
        successful: bool,
    ) -> HistoryResult<()> {
        let path = self.entry_path(task_path);
        let _lock = acquire_lock(&path.with_extension("lock"))?;

        let record = HistoryRecord::new(
            task_path,
            AfterPreviousExecutionState {
                snapshot,
                successful,
                origin,
            },
        );
        let json = serde_json::to_vec_pretty(&record)?;
        atomic_write(&path, &json)?;

        info!(
            "Stored execution history for '{task_path}' (build {}, successful: {successful})",
            record.state.origin.build_invocation_id
        );
        Ok(())
    }

    fn remove(&self, task_path: &str) -> HistoryResult<bool> {
        let path = self.entry_path(task_path);
        // The lock file is kept: unlinking it would let a waiting writer and a
        // new one lock different inodes
        let _lock = acquire_lock(&path.with_extension("lock"))?;

        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if removed {
            info!("Removed execution history for '{task_path}'");
        }
        Ok(removed)
    }

    fn task_paths(&self) -> HistoryResult<Vec<String>> {
        let mut paths = Vec::new();
        for entry in walkdir::WalkDir::new(self.history_dir()).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("json")
                && let Some(record) = Self::read_record(entry.path())?
            {
                paths.push(record.task_path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BuildInvocationId, ImplementationSnapshot};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn snapshot(code: &str) -> ExecutionSnapshot {
        ExecutionSnapshot {
            implementation: ImplementationSnapshot::from_source("Compile", code),
            additional_implementations: vec![],
            input_properties: BTreeMap::new(),
            input_file_properties: BTreeMap::new(),
            output_file_properties: BTreeMap::new(),
        }
    }

    fn origin() -> OriginMetadata {
        OriginMetadata::new(BuildInvocationId::generate(), Duration::from_millis(42))
    }

    #[test]
    fn test_missing_entry_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        assert!(store.load(":never-ran").unwrap().is_none());
    }

    #[test]
    fn test_store_and_reload() {
        let tmp = TempDir::new().unwrap();
        let origin = origin();

        {
            let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
            store.store(":compile", origin.clone(), snapshot("cc"), true).unwrap();
        }

        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        let state = store.load(":compile").unwrap().unwrap();
        assert_eq!(state.snapshot, snapshot("cc"));
        assert!(state.successful);
        assert_eq!(state.origin, origin);
        assert_eq!(store.task_paths().unwrap(), vec![":compile".to_string()]);
    }

    #[test]
    fn test_store_replaces_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();

        store.store(":compile", origin(), snapshot("v1"), true).unwrap();
        store.store(":compile", origin(), snapshot("v2"), false).unwrap();

        let state = store.load(":compile").unwrap().unwrap();
        assert_eq!(state.snapshot, snapshot("v2"));
        assert!(!state.successful);
    }

    #[test]
    fn test_corrupt_entry_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        store.store(":compile", origin(), snapshot("cc"), true).unwrap();

        fs::write(store.entry_path(":compile"), b"{ not json").unwrap();
        assert!(matches!(store.load(":compile"), Err(HistoryError::Corrupt { .. })));
    }

    #[test]
    fn test_unsupported_version_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        store.store(":compile", origin(), snapshot("cc"), true).unwrap();

        let path = store.entry_path(":compile");
        let mut record: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        record["format_version"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let err = store.load(":compile").unwrap_err();
        assert!(err.to_string().contains("unsupported format version 99"));
    }

    #[test]
    fn test_interrupted_write_keeps_previous_entry() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        store.store(":compile", origin(), snapshot("cc"), true).unwrap();

        // Simulate a crash after the temp file was written but before rename
        let temp = store.entry_path(":compile").with_extension("tmp");
        fs::write(&temp, b"{ half written").unwrap();
        File::options()
            .write(true)
            .open(&temp)
            .unwrap()
            .set_modified(SystemTime::now() - 2 * STALE_TEMP_AGE)
            .unwrap();

        let reopened = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        assert!(!temp.exists());
        assert_eq!(reopened.load(":compile").unwrap().unwrap().snapshot, snapshot("cc"));
    }

    #[test]
    fn test_recent_temp_file_is_left_to_its_writer() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        store.store(":compile", origin(), snapshot("cc"), true).unwrap();

        // Another process is between write and rename
        let temp = store.entry_path(":compile").with_extension("tmp");
        fs::write(&temp, b"{ in progress").unwrap();

        let _reopened = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        assert!(temp.exists());
    }

    #[test]
    fn test_unreadable_entry_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();

        // A directory where the entry should be cannot be read as a file
        fs::create_dir_all(store.entry_path(":compile")).unwrap();
        assert!(matches!(store.load(":compile"), Err(HistoryError::Io(_))));
        assert!(store.task_paths().unwrap().is_empty());
    }

    #[test]
    fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let store = FileExecutionHistoryStore::new(tmp.path()).unwrap();
        store.store(":compile", origin(), snapshot("cc"), true).unwrap();

        assert!(store.remove(":compile").unwrap());
        assert!(!store.remove(":compile").unwrap());
        assert!(store.load(":compile").unwrap().is_none());
        assert!(store.task_paths().unwrap().is_empty());
        assert!(store.entry_path(":compile").with_extension("lock").exists());
    }

    #[test]
    fn test_concurrent_writes_to_different_tasks() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileExecutionHistoryStore::new(tmp.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let task = format!(":task{i}");
                    for round in 0..5 {
                        store
                            .store(&task, origin(), snapshot(&format!("{i}-{round}")), true)
                            .unwrap();
                        let _ = store.load(&task).unwrap().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.task_paths().unwrap().len(), 8);
        for i in 0..8 {
            let state = store.load(&format!(":task{i}")).unwrap().unwrap();
            assert_eq!(state.snapshot, snapshot(&format!("{i}-4")));
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryExecutionHistoryStore::new();
        assert!(store.load(":a").unwrap().is_none());
        store.store(":b", origin(), snapshot("b"), true).unwrap();
        store.store(":a", origin(), snapshot("a"), true).unwrap();
        assert_eq!(store.task_paths().unwrap(), vec![":a".to_string(), ":b".to_string()]);
        assert!(store.remove(":a").unwrap());
        assert!(store.load(":a").unwrap().is_none());
    }
}
