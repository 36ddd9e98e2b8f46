//! Declared task properties
//!
//! Every task type declares its inputs and outputs once, through
//! [`TaskProperties::builder`]. The declarations are consumed uniformly by the
//! fingerprinter (to capture snapshots) and by the change detector.

use crate::fingerprint::PathNormalization;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Identity of a task in the build, e.g. `:app:compileJava` or `busybox:do_compile`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskIdentity {
    path: String,
}

impl TaskIdentity {
    /// Create from the task path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Task path used as the history key
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task '{}'", self.path)
    }
}

/// Input file property declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFileProperty {
    /// Property name
    pub name: String,
    /// Which part of the path is significant
    pub normalization: PathNormalization,
    /// Roots to fingerprint
    pub roots: Vec<PathBuf>,
}

/// Output file property declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileProperty {
    /// Property name
    pub name: String,
    /// Roots the task writes into
    pub roots: Vec<PathBuf>,
}

/// Statically declared properties of one task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskProperties {
    input_properties: BTreeSet<String>,
    input_files: BTreeMap<String, InputFileProperty>,
    output_files: BTreeMap<String, OutputFileProperty>,
    incremental: bool,
}

impl TaskProperties {
    /// Start declaring properties
    #[must_use]
    pub fn builder() -> TaskPropertiesBuilder {
        TaskPropertiesBuilder::default()
    }

    /// Names of non-file input properties, sorted
    pub fn input_property_names(&self) -> impl Iterator<Item = &str> {
        self.input_properties.iter().map(String::as_str)
    }

    /// Input file properties, sorted by name
    pub fn input_files(&self) -> impl Iterator<Item = &InputFileProperty> {
        self.input_files.values()
    }

    /// Output file properties, sorted by name
    pub fn output_files(&self) -> impl Iterator<Item = &OutputFileProperty> {
        self.output_files.values()
    }

    /// Whether the task body can consume incremental input changes
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    /// Whether the task declares any outputs
    #[must_use]
    pub fn has_declared_outputs(&self) -> bool {
        !self.output_files.is_empty()
    }
}

/// Builder for [`TaskProperties`]. Re-declaring a name replaces the earlier declaration.
#[derive(Debug, Default)]
pub struct TaskPropertiesBuilder {
    properties: TaskProperties,
}

impl TaskPropertiesBuilder {
    /// Declare a non-file input property
    #[must_use]
    pub fn input_property(mut self, name: impl Into<String>) -> Self {
        let _ = self.properties.input_properties.insert(name.into());
        self
    }

    /// Declare an input file property
    #[must_use]
    pub fn input_files<I, P>(
        mut self,
        name: impl Into<String>,
        normalization: PathNormalization,
        roots: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let name = name.into();
        let _ = self.properties.input_files.insert(
            name.clone(),
            InputFileProperty {
                name,
                normalization,
                roots: roots.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Declare an output file property
    #[must_use]
    pub fn output_files<I, P>(mut self, name: impl Into<String>, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let name = name.into();
        let _ = self.properties.output_files.insert(
            name.clone(),
            OutputFileProperty {
                name,
                roots: roots.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Mark the task as able to process incremental input changes
    #[must_use]
    pub fn incremental(mut self, incremental: bool) -> Self {
        self.properties.incremental = incremental;
        self
    }

    /// Finish the declarations
    #[must_use]
    pub fn build(self) -> TaskProperties {
        self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sorts_and_deduplicates() {
        let properties = TaskProperties::builder()
            .input_property("target")
            .input_property("flags")
            .input_files("sources", PathNormalization::Relative, ["src"])
            .input_files("headers", PathNormalization::Relative, ["include"])
            .input_files("sources", PathNormalization::NameOnly, ["src", "gen"])
            .output_files("objects", ["build/obj"])
            .incremental(true)
            .build();

        let names: Vec<_> = properties.input_property_names().collect();
        assert_eq!(names, vec!["flags", "target"]);

        let files: Vec<_> = properties.input_files().map(|p| p.name.as_str()).collect();
        assert_eq!(files, vec!["headers", "sources"]);

        let sources = properties.input_files().find(|p| p.name == "sources").unwrap();
        assert_eq!(sources.normalization, PathNormalization::NameOnly);
        assert_eq!(sources.roots.len(), 2);

        assert!(properties.is_incremental());
        assert!(properties.has_declared_outputs());
    }

    #[test]
    fn test_task_identity_display() {
        let task = TaskIdentity::new(":app:compile");
        assert_eq!(task.path(), ":app:compile");
        assert_eq!(task.to_string(), "task ':app:compile'");
    }
}
