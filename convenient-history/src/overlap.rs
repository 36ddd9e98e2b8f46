//! Overlapping output detection
//!
//! Outputs overlap when a location under a task's declared output roots holds
//! content the task did not produce in its previous execution: something else
//! (usually another task sharing the directory) created or rewrote it.

use crate::fingerprint::{FileCollectionFingerprint, FileType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// First output location found to be shared with another producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlappingOutputs {
    /// Output property whose roots contain the location
    pub property_name: String,
    /// Absolute path of the overlapping location
    pub overlapped_file_path: String,
}

impl OverlappingOutputs {
    /// Compare the outputs present before this execution against the
    /// outputs recorded after the previous one.
    ///
    /// Properties are visited by name and files by path; the first location
    /// that exists and was either absent from the previous record, or is a
    /// non-directory whose hash differs from the recorded one, is reported.
    #[must_use]
    pub fn detect(
        previous_outputs: Option<&BTreeMap<String, FileCollectionFingerprint>>,
        current_outputs: &BTreeMap<String, FileCollectionFingerprint>,
    ) -> Option<Self> {
        let empty = FileCollectionFingerprint::EMPTY;
        for (property_name, before_execution) in current_outputs {
            let after_previous = previous_outputs
                .and_then(|outputs| outputs.get(property_name))
                .unwrap_or(&empty);

            if let Some(overlap) =
                Self::detect_property(property_name, after_previous, before_execution)
            {
                info!(
                    "Detected overlapping output in property '{}': {}",
                    overlap.property_name, overlap.overlapped_file_path
                );
                return Some(overlap);
            }
        }
        None
    }

    fn detect_property(
        property_name: &str,
        after_previous: &FileCollectionFingerprint,
        before_execution: &FileCollectionFingerprint,
    ) -> Option<Self> {
        for (path, fingerprint) in before_execution.fingerprints() {
            if fingerprint.file_type == FileType::Missing {
                continue;
            }
            let overlapped = match after_previous.get(path) {
                // Created since the previous execution
                None => true,
                Some(previous) => {
                    fingerprint.file_type != FileType::Directory
                        && previous.normalized_content_hash != fingerprint.normalized_content_hash
                }
            };
            if overlapped {
                return Some(Self {
                    property_name: property_name.to_string(),
                    overlapped_file_path: path.clone(),
                });
            }
        }
        None
    }
}

impl fmt::Display for OverlappingOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "output property '{}' with path '{}'",
            self.property_name, self.overlapped_file_path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FileSystemLocationFingerprint;
    use crate::hash::ContentHash;

    fn outputs(
        property: &str,
        entries: Vec<(&str, FileSystemLocationFingerprint)>,
    ) -> BTreeMap<String, FileCollectionFingerprint> {
        BTreeMap::from([(
            property.to_string(),
            FileCollectionFingerprint::from_entries(entries),
        )])
    }

    fn file(content: &str) -> FileSystemLocationFingerprint {
        FileSystemLocationFingerprint::file("", ContentHash::from_bytes(content.as_bytes()))
    }

    #[test]
    fn test_no_overlap_when_outputs_match_history() {
        let previous = outputs(
            "out",
            vec![
                ("/o", FileSystemLocationFingerprint::directory("")),
                ("/o/a", file("a")),
            ],
        );
        let current = previous.clone();
        assert_eq!(OverlappingOutputs::detect(Some(&previous), &current), None);
    }

    #[test]
    fn test_file_created_by_someone_else() {
        let previous = outputs(
            "out",
            vec![
                ("/o", FileSystemLocationFingerprint::directory("")),
                ("/o/a", file("a")),
            ],
        );
        let current = outputs(
            "out",
            vec![
                ("/o", FileSystemLocationFingerprint::directory("")),
                ("/o/a", file("a")),
                ("/o/b", file("b")),
            ],
        );

        let overlap = OverlappingOutputs::detect(Some(&previous), &current).unwrap();
        assert_eq!(overlap.property_name, "out");
        assert_eq!(overlap.overlapped_file_path, "/o/b");
    }

    #[test]
    fn test_file_rewritten_since_previous_execution() {
        let previous = outputs("out", vec![("/o/a", file("a"))]);
        let current = outputs("out", vec![("/o/a", file("rewritten"))]);

        let overlap = OverlappingOutputs::detect(Some(&previous), &current).unwrap();
        assert_eq!(overlap.overlapped_file_path, "/o/a");
    }

    #[test]
    fn test_missing_and_directories_are_ignored() {
        let previous = outputs("out", vec![("/o", FileSystemLocationFingerprint::directory("x"))]);
        let current = outputs(
            "out",
            vec![
                ("/o", FileSystemLocationFingerprint::directory("y")),
                ("/o/missing", FileSystemLocationFingerprint::missing("")),
            ],
        );
        assert_eq!(OverlappingOutputs::detect(Some(&previous), &current), None);
    }

    #[test]
    fn test_existing_files_without_history_overlap() {
        let current = outputs("out", vec![("/o/stale", file("s"))]);
        let overlap = OverlappingOutputs::detect(None, &current).unwrap();
        assert_eq!(overlap.to_string(), "output property 'out' with path '/o/stale'");
    }

    #[test]
    fn test_only_first_overlap_is_reported() {
        let mut current = outputs("classes", vec![("/c/x", file("x")), ("/c/y", file("y"))]);
        let _ = current.insert(
            "resources".to_string(),
            FileCollectionFingerprint::from_entries([("/r/z", file("z"))]),
        );

        let overlap = OverlappingOutputs::detect(None, &current).unwrap();
        assert_eq!(overlap.property_name, "classes");
        assert_eq!(overlap.overlapped_file_path, "/c/x");
    }
}
