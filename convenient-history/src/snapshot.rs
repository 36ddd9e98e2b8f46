//! Execution snapshots
//!
//! An [`ExecutionSnapshot`] is the identity-relevant state of a task at one
//! instant: which implementation runs, the digests of its input values and the
//! fingerprints of its input and output files. The snapshot taken before the
//! task body runs is compared against the [`AfterPreviousExecutionState`]
//! loaded from history.

use crate::error::SnapshotError;
use crate::fingerprint::{FileCollectionFingerprint, FingerprinterRegistry, PathNormalization};
use crate::hash::{CanonicalHasher, ContentHash};
use crate::properties::TaskProperties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of the code that implements a task or one of its extra actions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImplementationSnapshot {
    /// Type (or script) name
    pub type_name: String,
    /// Hash of the implementation; `None` when its origin is unknown
    pub code_hash: Option<ContentHash>,
}

impl ImplementationSnapshot {
    /// Implementation with a known code hash
    pub fn new(type_name: impl Into<String>, code_hash: ContentHash) -> Self {
        Self {
            type_name: type_name.into(),
            code_hash: Some(code_hash),
        }
    }

    /// Implementation whose code cannot be identified
    pub fn unknown(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            code_hash: None,
        }
    }

    /// Implementation identified by hashing its source text
    pub fn from_source(type_name: impl Into<String>, source: &str) -> Self {
        Self::new(type_name, ContentHash::from_bytes(source.as_bytes()))
    }

    /// Whether the code hash is unknown
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.code_hash.is_none()
    }
}

impl fmt::Display for ImplementationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code_hash {
            Some(hash) => write!(f, "{}@{}", self.type_name, hash.short()),
            None => write!(f, "{}@<unknown>", self.type_name),
        }
    }
}

/// Digest of an input property value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueSnapshot(ContentHash);

impl ValueSnapshot {
    /// Snapshot any serializable value.
    ///
    /// The value goes through `serde_json::Value`, whose object keys are
    /// sorted, so equal values always yield equal snapshots.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the value cannot be represented as JSON.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
        let mut hasher = CanonicalHasher::new("value");
        hasher.put_bytes(&canonical);
        Ok(Self(hasher.finish()))
    }

    /// Wrap an already computed digest
    #[must_use]
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Digest of the value
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }
}

/// Unique id of one build invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildInvocationId(Uuid);

impl BuildInvocationId {
    /// Fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing id
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for BuildInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which build produced a recorded execution, and how long it took
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginMetadata {
    /// Build that ran the task
    pub build_invocation_id: BuildInvocationId,
    /// Wall-clock time spent executing the task
    pub execution_time: Duration,
}

impl OriginMetadata {
    /// Create origin metadata
    #[must_use]
    pub fn new(build_invocation_id: BuildInvocationId, execution_time: Duration) -> Self {
        Self {
            build_invocation_id,
            execution_time,
        }
    }
}

/// Task state captured at one instant.
///
/// Map keys are exactly the properties declared by the task for that execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    /// Task implementation
    pub implementation: ImplementationSnapshot,
    /// Additional actions attached to the task, in execution order
    pub additional_implementations: Vec<ImplementationSnapshot>,
    /// Non-file input property digests
    pub input_properties: BTreeMap<String, ValueSnapshot>,
    /// Input file fingerprints per property
    pub input_file_properties: BTreeMap<String, FileCollectionFingerprint>,
    /// Output file fingerprints per property
    pub output_file_properties: BTreeMap<String, FileCollectionFingerprint>,
}

impl ExecutionSnapshot {
    /// Capture the before-execution snapshot of a task.
    ///
    /// Every declared input property must have a value in `values` and no
    /// undeclared value may be present. File properties are fingerprinted
    /// through `registry`; outputs always use absolute paths. The previous
    /// execution, when known, is passed to the fingerprinters as a hint.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] naming the offending property.
    pub fn capture<V>(
        implementation: ImplementationSnapshot,
        additional_implementations: Vec<ImplementationSnapshot>,
        values: V,
        properties: &TaskProperties,
        registry: &FingerprinterRegistry,
        previous: Option<&AfterPreviousExecutionState>,
    ) -> Result<Self, SnapshotError>
    where
        V: IntoIterator<Item = (String, serde_json::Value)>,
    {
        let mut values: BTreeMap<String, serde_json::Value> = values.into_iter().collect();

        let mut input_properties = BTreeMap::new();
        for name in properties.input_property_names() {
            let value = values
                .remove(name)
                .ok_or_else(|| SnapshotError::MissingValue(name.to_string()))?;
            let snapshot = ValueSnapshot::of(&value).map_err(|source| SnapshotError::Value {
                property: name.to_string(),
                source,
            })?;
            let _ = input_properties.insert(name.to_string(), snapshot);
        }
        if let Some(name) = values.into_keys().next() {
            return Err(SnapshotError::UndeclaredValue(name));
        }

        let mut input_file_properties = BTreeMap::new();
        for property in properties.input_files() {
            let hint = previous.and_then(|p| p.snapshot.input_file_properties.get(&property.name));
            let fingerprint = registry
                .get(property.normalization)
                .fingerprint_with_hint(&property.roots, hint)
                .map_err(|source| SnapshotError::Fingerprint {
                    property: property.name.clone(),
                    source,
                })?;
            let _ = input_file_properties.insert(property.name.clone(), fingerprint);
        }

        let output_file_properties = fingerprint_outputs(properties, registry, previous)?;

        Ok(Self {
            implementation,
            additional_implementations,
            input_properties,
            input_file_properties,
            output_file_properties,
        })
    }

    /// All implementations, task implementation first
    pub fn implementations(&self) -> impl Iterator<Item = &ImplementationSnapshot> {
        std::iter::once(&self.implementation).chain(self.additional_implementations.iter())
    }
}

/// Snapshot taken before the current execution
pub type BeforeExecutionState = ExecutionSnapshot;

/// Fingerprint every declared output property with absolute paths.
pub(crate) fn fingerprint_outputs(
    properties: &TaskProperties,
    registry: &FingerprinterRegistry,
    previous: Option<&AfterPreviousExecutionState>,
) -> Result<BTreeMap<String, FileCollectionFingerprint>, SnapshotError> {
    let fingerprinter = registry.get(PathNormalization::Absolute);
    let mut outputs = BTreeMap::new();
    for property in properties.output_files() {
        let hint = previous.and_then(|p| p.snapshot.output_file_properties.get(&property.name));
        let fingerprint = fingerprinter
            .fingerprint_with_hint(&property.roots, hint)
            .map_err(|source| SnapshotError::Fingerprint {
                property: property.name.clone(),
                source,
            })?;
        let _ = outputs.insert(property.name.clone(), fingerprint);
    }
    Ok(outputs)
}

/// The execution recorded in history for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfterPreviousExecutionState {
    /// State recorded after the previous execution (outputs as produced)
    pub snapshot: ExecutionSnapshot,
    /// Whether the previous execution succeeded
    pub successful: bool,
    /// Which build produced it
    pub origin: OriginMetadata,
}
