//! File collection fingerprints
//!
//! A fingerprint records, for every file system location under a set of roots,
//! its type and a content hash together with a normalized path. Which part of
//! the path is significant is decided by the [`PathNormalization`] of the
//! property being fingerprinted. The map is keyed by absolute path for
//! reporting; comparisons use the normalized path unless the normalization is
//! [`PathNormalization::Absolute`].

use crate::hash::{CanonicalHasher, ContentHash};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::debug;
use walkdir::WalkDir;

static DIR_SIGNATURE: LazyLock<ContentHash> = LazyLock::new(|| ContentHash::from_bytes(b"DIR"));
static MISSING_FILE_SIGNATURE: LazyLock<ContentHash> =
    LazyLock::new(|| ContentHash::from_bytes(b"MISSING"));

/// Kind of file system location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// A regular file (or a symlink resolving to one)
    RegularFile,
    /// A directory
    Directory,
    /// Nothing exists at the location
    Missing,
}

/// Which part of a file path is significant for a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathNormalization {
    /// Full absolute path
    Absolute,
    /// Path relative to the declared root
    Relative,
    /// File name only
    NameOnly,
    /// Path is ignored, only content counts
    Ignored,
}

impl PathNormalization {
    const ALL: [Self; 4] = [Self::Absolute, Self::Relative, Self::NameOnly, Self::Ignored];

    fn index(self) -> usize {
        match self {
            Self::Absolute => 0,
            Self::Relative => 1,
            Self::NameOnly => 2,
            Self::Ignored => 3,
        }
    }

    /// Normalize `path` found beneath `root`.
    #[must_use]
    pub fn normalize(self, root: &Path, path: &Path) -> String {
        match self {
            Self::Absolute => path.to_string_lossy().into_owned(),
            Self::Relative => {
                if path == root {
                    if root.is_dir() {
                        String::new()
                    } else {
                        file_name(path)
                    }
                } else {
                    path.strip_prefix(root)
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .unwrap_or_else(|_| file_name(path))
                }
            }
            Self::NameOnly => file_name(path),
            Self::Ignored => String::new(),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Fingerprint of a single file system location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemLocationFingerprint {
    /// Path after normalization
    pub normalized_path: String,
    /// What was found at the location
    pub file_type: FileType,
    /// Content hash (fixed signatures for directories and missing files)
    pub normalized_content_hash: ContentHash,
}

impl FileSystemLocationFingerprint {
    /// Fingerprint of a regular file with the given content hash
    #[must_use]
    pub fn file(normalized_path: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            normalized_path: normalized_path.into(),
            file_type: FileType::RegularFile,
            normalized_content_hash: hash,
        }
    }

    /// Fingerprint of a directory
    #[must_use]
    pub fn directory(normalized_path: impl Into<String>) -> Self {
        Self {
            normalized_path: normalized_path.into(),
            file_type: FileType::Directory,
            normalized_content_hash: DIR_SIGNATURE.clone(),
        }
    }

    /// Fingerprint of a location where nothing exists
    #[must_use]
    pub fn missing(normalized_path: impl Into<String>) -> Self {
        Self {
            normalized_path: normalized_path.into(),
            file_type: FileType::Missing,
            normalized_content_hash: MISSING_FILE_SIGNATURE.clone(),
        }
    }
}

/// Ordered fingerprint of a collection of files, keyed by absolute path.
///
/// Immutable once built; use [`FileCollectionFingerprint::from_entries`] or a
/// [`FileCollectionFingerprinter`] to create one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCollectionFingerprint {
    normalization: PathNormalization,
    fingerprints: BTreeMap<String, FileSystemLocationFingerprint>,
}

impl Default for FileCollectionFingerprint {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FileCollectionFingerprint {
    /// Fingerprint with no entries
    pub const EMPTY: Self = Self {
        normalization: PathNormalization::Absolute,
        fingerprints: BTreeMap::new(),
    };

    /// Build from `(absolute path, fingerprint)` pairs, compared by absolute path
    pub fn from_entries<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, FileSystemLocationFingerprint)>,
        P: Into<String>,
    {
        Self {
            normalization: PathNormalization::Absolute,
            fingerprints: entries.into_iter().map(|(p, f)| (p.into(), f)).collect(),
        }
    }

    /// Same entries, compared according to `normalization`
    #[must_use]
    pub fn with_normalization(mut self, normalization: PathNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Normalization the entries were recorded with
    #[must_use]
    pub fn normalization(&self) -> PathNormalization {
        self.normalization
    }

    /// All entries, ordered by absolute path
    #[must_use]
    pub fn fingerprints(&self) -> &BTreeMap<String, FileSystemLocationFingerprint> {
        &self.fingerprints
    }

    /// Look up one location
    #[must_use]
    pub fn get(&self, absolute_path: &str) -> Option<&FileSystemLocationFingerprint> {
        self.fingerprints.get(absolute_path)
    }

    /// Number of recorded locations
    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Absolute paths of all recorded locations that exist
    pub fn existing_paths(&self) -> impl Iterator<Item = &str> {
        self.fingerprints
            .iter()
            .filter(|(_, f)| f.file_type != FileType::Missing)
            .map(|(path, _)| path.as_str())
    }

    /// Keep only entries accepted by `keep`
    #[must_use]
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&str, &FileSystemLocationFingerprint) -> bool,
    {
        Self {
            normalization: self.normalization,
            fingerprints: self
                .fingerprints
                .iter()
                .filter(|(path, f)| keep(path, f))
                .map(|(path, f)| (path.clone(), f.clone()))
                .collect(),
        }
    }

    /// Location-independent hash of the collection.
    ///
    /// Only normalized paths and content hashes contribute, sorted so that the
    /// result does not depend on where the files live on disk.
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        let mut entries: Vec<(&str, &ContentHash)> = self
            .fingerprints
            .values()
            .map(|f| (f.normalized_path.as_str(), &f.normalized_content_hash))
            .collect();
        entries.sort();

        let mut hasher = CanonicalHasher::new("file-collection");
        for (path, hash) in entries {
            hasher.put_str(path);
            hasher.put_hash(hash);
        }
        hasher.finish()
    }
}

impl fmt::Display for FileCollectionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s), hash {}", self.len(), self.hash().short())
    }
}

/// Produces fingerprints for a set of roots
pub trait FileCollectionFingerprinter: Send + Sync {
    /// Normalization applied by this fingerprinter
    fn normalization(&self) -> PathNormalization;

    /// Fingerprint everything beneath `roots`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the first location that could not be read.
    fn fingerprint(&self, roots: &[PathBuf]) -> io::Result<FileCollectionFingerprint>;

    /// Fingerprint with the previous fingerprint of the same property as a hint.
    ///
    /// Strategies that can reuse earlier work override this; the default
    /// ignores the hint.
    ///
    /// # Errors
    ///
    /// Same as [`FileCollectionFingerprinter::fingerprint`].
    fn fingerprint_with_hint(
        &self,
        roots: &[PathBuf],
        _previous: Option<&FileCollectionFingerprint>,
    ) -> io::Result<FileCollectionFingerprint> {
        self.fingerprint(roots)
    }
}

/// Walks roots with `walkdir` and hashes file content with SHA-256
#[derive(Debug, Clone, Copy)]
pub struct DefaultFileCollectionFingerprinter {
    normalization: PathNormalization,
}

impl DefaultFileCollectionFingerprinter {
    /// Create a fingerprinter for the given normalization
    #[must_use]
    pub fn new(normalization: PathNormalization) -> Self {
        Self { normalization }
    }
}

enum Located {
    File(PathBuf, String),
    Directory(PathBuf, String),
    Missing(PathBuf, String),
}

impl Located {
    /// Hash the location; a file deleted since the walk is recorded as missing
    fn fingerprint(self) -> io::Result<(String, FileSystemLocationFingerprint)> {
        match self {
            Self::File(path, normalized) => match ContentHash::from_file(&path) {
                Ok(hash) => Ok((key(&path), FileSystemLocationFingerprint::file(normalized, hash))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} disappeared while fingerprinting", path.display());
                    Ok((key(&path), FileSystemLocationFingerprint::missing(normalized)))
                }
                Err(e) => Err(e),
            },
            Self::Directory(path, normalized) => {
                Ok((key(&path), FileSystemLocationFingerprint::directory(normalized)))
            }
            Self::Missing(path, normalized) => {
                Ok((key(&path), FileSystemLocationFingerprint::missing(normalized)))
            }
        }
    }
}

impl FileCollectionFingerprinter for DefaultFileCollectionFingerprinter {
    fn normalization(&self) -> PathNormalization {
        self.normalization
    }

    fn fingerprint(&self, roots: &[PathBuf]) -> io::Result<FileCollectionFingerprint> {
        let mut located = Vec::new();

        for root in roots {
            let root = std::path::absolute(root)?;
            if !root.exists() {
                let normalized = self.normalization.normalize(&root, &root);
                located.push(Located::Missing(root, normalized));
                continue;
            }

            // Symlinks are followed; walkdir reports loops as errors
            for entry in WalkDir::new(&root).follow_links(true).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) if is_vanished(&e) => {
                        // Dangling symlink, or deleted during the walk
                        if let Some(path) = e.path().map(Path::to_path_buf) {
                            let normalized = self.normalization.normalize(&root, &path);
                            located.push(Located::Missing(path, normalized));
                        }
                        continue;
                    }
                    Err(e) => return Err(io::Error::from(e)),
                };
                let path = entry.path().to_path_buf();
                let normalized = self.normalization.normalize(&root, &path);
                if entry.file_type().is_dir() {
                    located.push(Located::Directory(path, normalized));
                } else if entry.file_type().is_file() {
                    located.push(Located::File(path, normalized));
                } else {
                    debug!("Skipping special file {}", path.display());
                }
            }
        }

        let entries = located
            .into_par_iter()
            .map(Located::fingerprint)
            .collect::<io::Result<Vec<_>>>()?;

        let fingerprint =
            FileCollectionFingerprint::from_entries(entries).with_normalization(self.normalization);
        debug!(
            "Fingerprinted {} root(s) with {:?}: {}",
            roots.len(),
            self.normalization,
            fingerprint
        );
        Ok(fingerprint)
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn is_vanished(error: &walkdir::Error) -> bool {
    error.loop_ancestor().is_none()
        && error
            .io_error()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

/// One fingerprinter per [`PathNormalization`]
#[derive(Clone)]
pub struct FingerprinterRegistry {
    fingerprinters: [Arc<dyn FileCollectionFingerprinter>; 4],
}

impl FingerprinterRegistry {
    /// Registry backed by [`DefaultFileCollectionFingerprinter`] for every normalization
    #[must_use]
    pub fn new() -> Self {
        Self {
            fingerprinters: PathNormalization::ALL.map(|normalization| {
                Arc::new(DefaultFileCollectionFingerprinter::new(normalization))
                    as Arc<dyn FileCollectionFingerprinter>
            }),
        }
    }

    /// Replace the fingerprinter for its normalization
    pub fn register(&mut self, fingerprinter: Arc<dyn FileCollectionFingerprinter>) {
        let index = fingerprinter.normalization().index();
        self.fingerprinters[index] = fingerprinter;
    }

    /// Fingerprinter for `normalization`
    #[must_use]
    pub fn get(&self, normalization: PathNormalization) -> &dyn FileCollectionFingerprinter {
        self.fingerprinters[normalization.index()].as_ref()
    }
}

impl Default for FingerprinterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FingerprinterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprinterRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_walks_directory_in_order() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src/nested")).unwrap();
        fs::write(tmp.path().join("src/b.txt"), "b").unwrap();
        fs::write(tmp.path().join("src/a.txt"), "a").unwrap();
        fs::write(tmp.path().join("src/nested/c.txt"), "c").unwrap();

        let fingerprinter = DefaultFileCollectionFingerprinter::new(PathNormalization::Relative);
        let fingerprint = fingerprinter.fingerprint(&[tmp.path().join("src")]).unwrap();

        let normalized: Vec<_> = fingerprint
            .fingerprints()
            .values()
            .map(|f| f.normalized_path.as_str())
            .collect();
        assert_eq!(normalized, vec!["", "a.txt", "b.txt", "nested", "nested/c.txt"]);
        assert_eq!(fingerprint.normalization(), PathNormalization::Relative);

        let a = fingerprint
            .get(&tmp.path().join("src/a.txt").to_string_lossy())
            .unwrap();
        assert_eq!(a.file_type, FileType::RegularFile);
        assert_eq!(a.normalized_content_hash, ContentHash::from_bytes(b"a"));
    }

    #[test]
    fn test_missing_root_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("absent");

        let fingerprint = DefaultFileCollectionFingerprinter::new(PathNormalization::Absolute)
            .fingerprint(std::slice::from_ref(&root))
            .unwrap();

        assert_eq!(fingerprint.len(), 1);
        let entry = fingerprint.get(&root.to_string_lossy()).unwrap();
        assert_eq!(entry.file_type, FileType::Missing);
        assert_eq!(fingerprint.existing_paths().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_walked() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("shared")).unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("shared/lib.c"), "int v1;").unwrap();
        symlink(tmp.path().join("shared"), tmp.path().join("src/lib")).unwrap();
        symlink(tmp.path().join("nowhere"), tmp.path().join("src/dangling")).unwrap();

        let fingerprinter = DefaultFileCollectionFingerprinter::new(PathNormalization::Relative);
        let roots = [tmp.path().join("src")];
        let before = fingerprinter.fingerprint(&roots).unwrap();

        let located: Vec<_> = before
            .fingerprints()
            .values()
            .map(|f| (f.normalized_path.as_str(), f.file_type))
            .collect();
        assert_eq!(
            located,
            vec![
                ("", FileType::Directory),
                ("dangling", FileType::Missing),
                ("lib", FileType::Directory),
                ("lib/lib.c", FileType::RegularFile),
            ]
        );

        fs::write(tmp.path().join("shared/lib.c"), "int v2;").unwrap();
        let after = fingerprinter.fingerprint(&roots).unwrap();
        assert_ne!(before.hash(), after.hash());
    }

    #[test]
    fn test_file_deleted_after_walk_is_missing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.txt");

        let (key, fingerprint) = Located::File(path.clone(), "gone.txt".to_string())
            .fingerprint()
            .unwrap();

        assert_eq!(key, path.to_string_lossy());
        assert_eq!(fingerprint.file_type, FileType::Missing);
        assert_eq!(fingerprint.normalized_path, "gone.txt");
    }

    #[test]
    fn test_relative_hash_ignores_location() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        for dir in [one.path(), two.path()] {
            fs::write(dir.join("input.txt"), "same").unwrap();
        }

        let fingerprinter = DefaultFileCollectionFingerprinter::new(PathNormalization::Relative);
        let a = fingerprinter.fingerprint(&[one.path().to_path_buf()]).unwrap();
        let b = fingerprinter.fingerprint(&[two.path().to_path_buf()]).unwrap();

        assert_ne!(a, b, "keys are absolute paths");
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_absolute_hash_depends_on_location() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        for dir in [one.path(), two.path()] {
            fs::write(dir.join("input.txt"), "same").unwrap();
        }

        let fingerprinter = DefaultFileCollectionFingerprinter::new(PathNormalization::Absolute);
        let a = fingerprinter.fingerprint(&[one.path().to_path_buf()]).unwrap();
        let b = fingerprinter.fingerprint(&[two.path().to_path_buf()]).unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_registry_replaces_by_normalization() {
        struct Fixed;
        impl FileCollectionFingerprinter for Fixed {
            fn normalization(&self) -> PathNormalization {
                PathNormalization::NameOnly
            }
            fn fingerprint(&self, _roots: &[PathBuf]) -> io::Result<FileCollectionFingerprint> {
                Ok(FileCollectionFingerprint::from_entries([(
                    "/fixed",
                    FileSystemLocationFingerprint::file("fixed", ContentHash::from_bytes(b"f")),
                )]))
            }
        }

        let mut registry = FingerprinterRegistry::new();
        registry.register(Arc::new(Fixed));

        let fingerprint = registry.get(PathNormalization::NameOnly).fingerprint(&[]).unwrap();
        assert_eq!(fingerprint.len(), 1);
        assert_eq!(
            registry.get(PathNormalization::Absolute).normalization(),
            PathNormalization::Absolute
        );
    }
}
