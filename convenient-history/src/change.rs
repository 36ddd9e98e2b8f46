//! Individual file changes

use crate::fingerprint::{
    FileCollectionFingerprint, FileSystemLocationFingerprint, FileType, PathNormalization,
};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

/// What happened to a file between two executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Present now, absent before
    Added,
    /// Present before, absent now
    Removed,
    /// Present in both with a different digest
    Modified,
}

/// Whether a change concerns an input or an output property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeScope {
    /// Input file property
    Input,
    /// Output file property
    Output,
}

/// A change to one file of one property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Added, removed or modified
    pub kind: ChangeKind,
    /// Input or output
    pub scope: ChangeScope,
    /// Property the file belongs to
    pub property: String,
    /// Absolute path of the file
    pub path: String,
}

impl Change {
    /// Whether the file was added
    #[must_use]
    pub fn is_added(&self) -> bool {
        self.kind == ChangeKind::Added
    }

    /// Whether the file was removed
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.kind == ChangeKind::Removed
    }

    /// Whether the file was modified
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.kind == ChangeKind::Modified
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            ChangeScope::Input => "Input",
            ChangeScope::Output => "Output",
        };
        let what = match self.kind {
            ChangeKind::Added => "has been added",
            ChangeKind::Removed => "has been removed",
            ChangeKind::Modified => "has changed",
        };
        write!(f, "{scope} property '{}' file {} {what}.", self.property, self.path)
    }
}

/// Diff one property's fingerprints.
///
/// Entries are paired by absolute path for [`PathNormalization::Absolute`]
/// and by normalized path and content otherwise, so relocating a root or
/// renaming a file whose name does not count is not a change. The result is
/// sorted by absolute path and holds one entry per differing location.
/// `include_added` set to `false` drops `Added` entries.
pub(crate) fn diff_fingerprints(
    scope: ChangeScope,
    property: &str,
    previous: &FileCollectionFingerprint,
    current: &FileCollectionFingerprint,
    include_added: bool,
    changes: &mut Vec<Change>,
) {
    let normalization = if previous.normalization() == current.normalization() {
        current.normalization()
    } else {
        PathNormalization::Absolute
    };

    let mut found = match normalization {
        PathNormalization::Absolute => diff_by_location(previous, current),
        _ => diff_by_normalized_path(normalization, previous, current),
    };
    found.sort_by(|a, b| a.1.cmp(b.1));

    changes.extend(
        found
            .into_iter()
            .filter(|(kind, _)| include_added || *kind != ChangeKind::Added)
            .map(|(kind, path)| Change {
                kind,
                scope,
                property: property.to_string(),
                path: path.to_string(),
            }),
    );
}

type Found<'a> = Vec<(ChangeKind, &'a str)>;

fn diff_by_location<'a>(
    previous: &'a FileCollectionFingerprint,
    current: &'a FileCollectionFingerprint,
) -> Found<'a> {
    let mut found = Vec::new();
    let mut previous = previous.fingerprints().iter().peekable();
    let mut current = current.fingerprints().iter().peekable();

    loop {
        match (previous.peek().copied(), current.peek().copied()) {
            (Some((prev_path, prev)), Some((cur_path, cur))) => match prev_path.cmp(cur_path) {
                Ordering::Less => {
                    found.extend(vanished(prev_path, prev));
                    let _ = previous.next();
                }
                Ordering::Greater => {
                    found.extend(appeared(cur_path, cur));
                    let _ = current.next();
                }
                Ordering::Equal => {
                    if let Some(kind) = compare(prev, cur) {
                        found.push((kind, cur_path.as_str()));
                    }
                    let _ = previous.next();
                    let _ = current.next();
                }
            },
            (Some((prev_path, prev)), None) => {
                found.extend(vanished(prev_path, prev));
                let _ = previous.next();
            }
            (None, Some((cur_path, cur))) => {
                found.extend(appeared(cur_path, cur));
                let _ = current.next();
            }
            (None, None) => break,
        }
    }
    found
}

fn diff_by_normalized_path<'a>(
    normalization: PathNormalization,
    previous: &'a FileCollectionFingerprint,
    current: &'a FileCollectionFingerprint,
) -> Found<'a> {
    type Identity<'f> = (&'f str, FileType, &'f ContentHash);
    fn identity(f: &FileSystemLocationFingerprint) -> Identity<'_> {
        (f.normalized_path.as_str(), f.file_type, &f.normalized_content_hash)
    }

    // Unchanged: same normalized path, type and content
    let mut unmatched: HashMap<Identity<'a>, VecDeque<&'a str>> = HashMap::new();
    for (path, f) in previous.fingerprints() {
        unmatched.entry(identity(f)).or_default().push_back(path.as_str());
    }
    let mut candidates = Vec::new();
    for (path, f) in current.fingerprints() {
        if unmatched.get_mut(&identity(f)).and_then(VecDeque::pop_front).is_none() {
            candidates.push((path.as_str(), f));
        }
    }
    let leftover: HashSet<&str> = unmatched.into_values().flatten().collect();

    // Names carry no information when paths are ignored, so pair by location
    let pairing = |path: &'a str, f: &'a FileSystemLocationFingerprint| -> &'a str {
        if normalization == PathNormalization::Ignored {
            path
        } else {
            f.normalized_path.as_str()
        }
    };
    let mut removed: HashMap<&str, VecDeque<(&str, &FileSystemLocationFingerprint)>> =
        HashMap::new();
    for (path, f) in previous.fingerprints() {
        if leftover.contains(path.as_str()) {
            removed.entry(pairing(path, f)).or_default().push_back((path.as_str(), f));
        }
    }

    let mut found = Vec::new();
    for (path, f) in candidates {
        match removed.get_mut(pairing(path, f)).and_then(VecDeque::pop_front) {
            Some((_, before)) => {
                if let Some(kind) = compare(before, f) {
                    found.push((kind, path));
                }
            }
            None => found.extend(appeared(path, f)),
        }
    }
    for (path, f) in removed.into_values().flatten() {
        found.extend(vanished(path, f));
    }
    found
}

fn appeared<'a>(
    path: &'a str,
    current: &FileSystemLocationFingerprint,
) -> Option<(ChangeKind, &'a str)> {
    (current.file_type != FileType::Missing).then_some((ChangeKind::Added, path))
}

fn vanished<'a>(
    path: &'a str,
    previous: &FileSystemLocationFingerprint,
) -> Option<(ChangeKind, &'a str)> {
    (previous.file_type != FileType::Missing).then_some((ChangeKind::Removed, path))
}

fn compare(
    previous: &FileSystemLocationFingerprint,
    current: &FileSystemLocationFingerprint,
) -> Option<ChangeKind> {
    match (previous.file_type, current.file_type) {
        (FileType::Missing, FileType::Missing) => None,
        (FileType::Missing, _) => Some(ChangeKind::Added),
        (_, FileType::Missing) => Some(ChangeKind::Removed),
        _ if previous.normalized_content_hash != current.normalized_content_hash
            || previous.normalized_path != current.normalized_path =>
        {
            Some(ChangeKind::Modified)
        }
        _ => None,
    }
}

/// Diff every property present in both maps, in property-name order.
///
/// Properties present on only one side are not visited; callers report those
/// as property-level changes.
pub(crate) fn diff_properties(
    scope: ChangeScope,
    previous: &BTreeMap<String, FileCollectionFingerprint>,
    current: &BTreeMap<String, FileCollectionFingerprint>,
    include_added: bool,
) -> Vec<Change> {
    let mut changes = Vec::new();
    for (name, current_fingerprint) in current {
        if let Some(previous_fingerprint) = previous.get(name) {
            diff_fingerprints(
                scope,
                name,
                previous_fingerprint,
                current_fingerprint,
                include_added,
                &mut changes,
            );
        }
    }
    changes
}
