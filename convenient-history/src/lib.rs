//! Incremental execution state engine for build tools.
//!
//! Decides, for each task in a build, whether it can be skipped, re-run
//! incrementally, or must be rebuilt from scratch, by comparing the current
//! state of its declared inputs and outputs against the record of its
//! previous execution.
//!
//! # Features
//!
//! - File fingerprinting with configurable path normalization
//! - Change detection with human-readable rebuild reasons
//! - Incremental input views for task bodies
//! - Location-independent build cache keys
//! - Detection of outputs shared with other producers
//! - Crash-safe, file-backed execution history
//!
//! # Example
//!
//! ```
//! use convenient_history::{
//!     BuildInvocationId, ImplementationSnapshot, OriginMetadata, TaskArtifactStateRepository,
//!     TaskIdentity, TaskProperties,
//! };
//! use std::time::Duration;
//!
//! let repository = TaskArtifactStateRepository::in_memory();
//! let task = TaskIdentity::new(":hello");
//! let properties = TaskProperties::builder().input_property("greeting").build();
//!
//! let state = repository.get_state_for(&task, &properties);
//! let previous = repository.load_previous(&task).unwrap();
//! let current = state
//!     .snapshot_before_execution(
//!         ImplementationSnapshot::from_source("Hello", "echo $greeting"),
//!         vec![],
//!         vec![("greeting".to_string(), serde_json::json!("hi"))],
//!         previous.as_ref(),
//!     )
//!     .unwrap();
//!
//! // First execution: no history yet
//! assert!(state.execution_state_changes(previous.as_ref(), &current).is_none());
//!
//! let outputs = state.snapshot_after_task_execution(previous.as_ref(), &current).unwrap();
//! let origin = OriginMetadata::new(BuildInvocationId::generate(), Duration::from_millis(3));
//! assert!(state.persist_new_outputs(previous.as_ref(), &current, outputs, true, origin).unwrap());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod cache_key;
pub mod change;
pub mod changes;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod history;
pub mod incremental;
pub mod outputs;
pub mod overlap;
pub mod properties;
pub mod repository;
pub mod snapshot;
pub mod state;

pub use cache_key::{CacheKey, CacheKeyInputs, TaskCacheKeyCalculator};
pub use change::{Change, ChangeKind, ChangeScope};
pub use changes::{DetectionOptions, ExecutionStateChanges, MAX_REASONS};
pub use config::HistoryConfig;
pub use error::{HistoryError, HistoryResult, IncrementalInputsError, SnapshotError};
pub use fingerprint::{
    DefaultFileCollectionFingerprinter, FileCollectionFingerprint, FileCollectionFingerprinter,
    FileSystemLocationFingerprint, FileType, FingerprinterRegistry, PathNormalization,
};
pub use hash::ContentHash;
pub use history::{
    ExecutionHistoryStore, FileExecutionHistoryStore, HistoryRecord, InMemoryExecutionHistoryStore,
};
pub use incremental::IncrementalTaskInputs;
pub use outputs::{FileOutputFilesRepository, InMemoryOutputFilesRepository, OutputFilesRepository};
pub use overlap::OverlappingOutputs;
pub use properties::{TaskIdentity, TaskProperties, TaskPropertiesBuilder};
pub use repository::TaskArtifactStateRepository;
pub use snapshot::{
    AfterPreviousExecutionState, BeforeExecutionState, BuildInvocationId, ExecutionSnapshot,
    ImplementationSnapshot, OriginMetadata, ValueSnapshot,
};
pub use state::TaskArtifactState;
