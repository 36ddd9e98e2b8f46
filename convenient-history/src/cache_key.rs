//! Build cache keys
//!
//! A cache key identifies the result of executing a task with a given set of
//! inputs. It is derived from the implementation, the input property values
//! and the location-independent hashes of the input files, plus the names of
//! the declared outputs. Output contents, timestamps and absolute paths never
//! contribute, so equal inputs give equal keys on any machine.

use crate::hash::{CanonicalHasher, ContentHash};
use crate::properties::{TaskIdentity, TaskProperties};
use crate::snapshot::{ExecutionSnapshot, ImplementationSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Per-component hashes that went into a key, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeyInputs {
    /// Task implementation
    pub implementation: Option<ImplementationSnapshot>,
    /// Additional actions
    pub additional_implementations: Vec<ImplementationSnapshot>,
    /// Input value digests by property
    pub input_value_hashes: BTreeMap<String, ContentHash>,
    /// Input file collection hashes by property
    pub input_file_hashes: BTreeMap<String, ContentHash>,
    /// Declared output property names
    pub output_property_names: Vec<String>,
}

/// Key identifying a cacheable task result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    hash: Option<ContentHash>,
    inputs: CacheKeyInputs,
}

impl CacheKey {
    /// The key, or `None` when the result must not be cached
    #[must_use]
    pub fn hash(&self) -> Option<&ContentHash> {
        self.hash.as_ref()
    }

    /// Whether the key can be used for a cache lookup
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.hash.is_some()
    }

    /// The components the key was built from
    #[must_use]
    pub fn inputs(&self) -> &CacheKeyInputs {
        &self.inputs
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "{hash}"),
            None => f.write_str("INVALID"),
        }
    }
}

/// Computes [`CacheKey`]s from before-execution snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCacheKeyCalculator;

impl TaskCacheKeyCalculator {
    /// Create a calculator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Calculate the key for `task`.
    ///
    /// Maps are visited in key order and every field is length-prefixed, so
    /// the key only depends on the values, never on iteration order.
    #[must_use]
    pub fn calculate(
        &self,
        task: &TaskIdentity,
        current: &ExecutionSnapshot,
        properties: &TaskProperties,
    ) -> CacheKey {
        let mut hasher = CanonicalHasher::new("task-cache-key");
        let mut valid = true;

        for implementation in current.implementations() {
            hasher.put_str(&implementation.type_name);
            match &implementation.code_hash {
                Some(hash) => hasher.put_hash(hash),
                None => valid = false,
            }
        }

        hasher.put_tag(b'v');
        let mut input_value_hashes = BTreeMap::new();
        for (name, value) in &current.input_properties {
            hasher.put_str(name);
            hasher.put_hash(value.hash());
            let _ = input_value_hashes.insert(name.clone(), value.hash().clone());
        }

        hasher.put_tag(b'f');
        let mut input_file_hashes = BTreeMap::new();
        for (name, fingerprint) in &current.input_file_properties {
            let hash = fingerprint.hash();
            hasher.put_str(name);
            hasher.put_hash(&hash);
            let _ = input_file_hashes.insert(name.clone(), hash);
        }

        hasher.put_tag(b'o');
        let output_property_names: Vec<String> =
            properties.output_files().map(|p| p.name.clone()).collect();
        for name in &output_property_names {
            hasher.put_str(name);
        }

        let inputs = CacheKeyInputs {
            implementation: Some(current.implementation.clone()),
            additional_implementations: current.additional_implementations.clone(),
            input_value_hashes,
            input_file_hashes,
            output_property_names,
        };

        let hash = if valid {
            let hash = hasher.finish();
            debug!("Cache key for {task} is {}", hash.short());
            Some(hash)
        } else {
            warn!("Cache key for {task} is invalid: implementation of unknown origin");
            None
        };

        CacheKey { hash, inputs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{
        FileCollectionFingerprint, FileSystemLocationFingerprint, PathNormalization,
    };
    use crate::snapshot::ValueSnapshot;
    use serde_json::json;

    fn fingerprint(root: &str, files: &[(&str, &str)]) -> FileCollectionFingerprint {
        FileCollectionFingerprint::from_entries(files.iter().map(|(relative, content)| {
            (
                format!("{root}/{relative}"),
                FileSystemLocationFingerprint::file(
                    *relative,
                    ContentHash::from_bytes(content.as_bytes()),
                ),
            )
        }))
    }

    fn snapshot(root: &str, values: &[(&str, serde_json::Value)]) -> ExecutionSnapshot {
        ExecutionSnapshot {
            implementation: ImplementationSnapshot::from_source("Compile", "cc"),
            additional_implementations: vec![],
            input_properties: values
                .iter()
                .map(|(name, value)| (name.to_string(), ValueSnapshot::of(value).unwrap()))
                .collect(),
            input_file_properties: BTreeMap::from([(
                "sources".to_string(),
                fingerprint(root, &[("a.c", "int a;"), ("b.c", "int b;")]),
            )]),
            output_file_properties: BTreeMap::new(),
        }
    }

    fn properties() -> TaskProperties {
        TaskProperties::builder()
            .input_property("level")
            .input_property("target")
            .input_files("sources", PathNormalization::Relative, ["src"])
            .output_files("objects", ["out"])
            .build()
    }

    #[test]
    fn test_key_is_deterministic_across_insertion_order() {
        let calculator = TaskCacheKeyCalculator::new();
        let task = TaskIdentity::new(":compile");

        let a = snapshot("/one", &[("level", json!(2)), ("target", json!("x86"))]);
        let b = snapshot("/one", &[("target", json!("x86")), ("level", json!(2))]);

        let key_a = calculator.calculate(&task, &a, &properties());
        let key_b = calculator.calculate(&task, &b, &properties());
        assert!(key_a.is_valid());
        assert_eq!(key_a, key_b);
        assert_eq!(key_a, calculator.calculate(&task, &a, &properties()));
    }

    #[test]
    fn test_key_ignores_absolute_location_and_outputs() {
        let calculator = TaskCacheKeyCalculator::new();
        let task = TaskIdentity::new(":compile");

        let a = snapshot("/home/alice/project", &[("level", json!(2))]);
        let mut b = snapshot("/ci/workspace", &[("level", json!(2))]);
        let _ = b.output_file_properties.insert(
            "objects".to_string(),
            fingerprint("/ci/workspace/out", &[("a.o", "obj")]),
        );

        assert_eq!(
            calculator.calculate(&task, &a, &properties()).hash(),
            calculator.calculate(&task, &b, &properties()).hash()
        );
    }

    #[test]
    fn test_key_changes_with_inputs() {
        let calculator = TaskCacheKeyCalculator::new();
        let task = TaskIdentity::new(":compile");

        let base = snapshot("/p", &[("level", json!(2))]);
        let base = calculator.calculate(&task, &base, &properties());
        let value = snapshot("/p", &[("level", json!(3))]);
        let value = calculator.calculate(&task, &value, &properties());
        assert_ne!(base.hash(), value.hash());

        let mut edited = snapshot("/p", &[("level", json!(2))]);
        let sources = fingerprint("/p", &[("a.c", "int a = 1;"), ("b.c", "int b;")]);
        let _ = edited
            .input_file_properties
            .insert("sources".to_string(), sources);
        let files = calculator.calculate(&task, &edited, &properties());
        assert_ne!(base.hash(), files.hash());

        let renamed_outputs = TaskProperties::builder().output_files("binaries", ["out"]).build();
        let unchanged = snapshot("/p", &[("level", json!(2))]);
        let outputs = calculator.calculate(&task, &unchanged, &renamed_outputs);
        assert_ne!(base.hash(), outputs.hash());
    }

    #[test]
    fn test_unknown_implementation_is_not_cacheable() {
        let calculator = TaskCacheKeyCalculator::new();
        let mut current = snapshot("/p", &[]);
        current.additional_implementations.push(ImplementationSnapshot::unknown("doLast"));

        let key = calculator.calculate(&TaskIdentity::new(":compile"), &current, &properties());
        assert!(!key.is_valid());
        assert_eq!(key.to_string(), "INVALID");
        assert_eq!(key.inputs().input_file_hashes.len(), 1);
    }
}
