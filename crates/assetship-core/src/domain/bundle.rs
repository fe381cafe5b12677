//! Asset trees: relative-path → bytes maps and merge results.
//!
//! Bundles are keyed by a normalised [`AssetPath`] in a `BTreeMap`, so every
//! iteration, fingerprint and on-disk write happens in path order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// AssetPath
// ---------------------------------------------------------------------------

/// Relative, `/`-separated path of an asset inside a bundle.
///
/// Never absolute and never contains `..`, so joining it onto a root
/// cannot escape that root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AssetPath(String);

impl AssetPath {
    /// Normalise and validate a raw relative path. Backslashes are treated as
    /// separators; empty and `.` segments are dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| PipelineError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let unified = raw.replace('\\', "/");
        if unified.starts_with('/') {
            return Err(invalid("absolute paths are not allowed"));
        }

        let mut segments = Vec::new();
        for segment in unified.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(invalid("parent directory segments are not allowed")),
                s if segments.is_empty() && s.len() == 2 && s.ends_with(':') => {
                    return Err(invalid("drive-prefixed paths are not allowed"))
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(invalid("path is empty"));
        }
        Ok(AssetPath(segments.join("/")))
    }

    /// Build from a filesystem path relative to a bundle root.
    pub fn from_relative(path: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(part) => parts.push(part),
                    None => {
                        return Err(PipelineError::InvalidPath {
                            path: path.display().to_string(),
                            reason: "file name is not valid UTF-8".to_string(),
                        })
                    }
                },
                Component::CurDir => {}
                _ => {
                    return Err(PipelineError::InvalidPath {
                        path: path.display().to_string(),
                        reason: "not a plain relative path".to_string(),
                    })
                }
            }
        }
        AssetPath::parse(&parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of this asset under `root`.
    pub fn join_onto(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

impl std::fmt::Display for AssetPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// AssetBundle
// ---------------------------------------------------------------------------

/// Set of `(relative path, bytes)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetBundle {
    files: BTreeMap<AssetPath, Vec<u8>>,
}

impl AssetBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, returning the previous content at that path.
    pub fn insert(&mut self, path: AssetPath, content: Vec<u8>) -> Option<Vec<u8>> {
        self.files.insert(path, content)
    }

    pub fn get(&self, path: &AssetPath) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &AssetPath> {
        self.files.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetPath, &[u8])> {
        self.files.iter().map(|(p, c)| (p, c.as_slice()))
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|c| c.len() as u64).sum()
    }

    /// SHA-256 over every `(path, content)` pair in path order.
    ///
    /// Equal bundles always produce equal fingerprints regardless of the
    /// order files were inserted in.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update((path.as_str().len() as u64).to_le_bytes());
            hasher.update(path.as_str().as_bytes());
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content);
        }
        hex::encode(hasher.finalize())
    }

    /// Load every regular file under `root`. A missing root is an empty bundle.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut bundle = AssetBundle::new();
        if !root.exists() {
            return Ok(bundle);
        }
        for file in walk_files(root)? {
            let relative = file
                .strip_prefix(root)
                .map_err(|_| PipelineError::InvalidPath {
                    path: file.display().to_string(),
                    reason: "outside bundle root".to_string(),
                })?;
            let path = AssetPath::from_relative(relative)?;
            let content = std::fs::read(&file)?;
            bundle.insert(path, content);
        }
        Ok(bundle)
    }

    /// Write every file under `root`, creating parent directories.
    pub fn write_to(&self, root: &Path) -> Result<()> {
        std::fs::create_dir_all(root)?;
        for (path, content) in &self.files {
            let target = path.join_onto(root);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
        }
        Ok(())
    }
}

impl FromIterator<(AssetPath, Vec<u8>)> for AssetBundle {
    fn from_iter<I: IntoIterator<Item = (AssetPath, Vec<u8>)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AssetBundle {
    type Item = (AssetPath, Vec<u8>);
    type IntoIter = std::collections::btree_map::IntoIter<AssetPath, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

/// Recursive walk returning regular files. Symlinks are skipped.
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            files.extend(walk_files(&path)?);
        } else if file_type.is_file() {
            files.push(path);
        } else {
            warn!(path = %path.display(), "skipping non-regular file in asset tree");
        }
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// MergedTree
// ---------------------------------------------------------------------------

/// Result of merging an incoming bundle over a baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTree {
    /// Union of baseline and incoming; incoming content wins on collision.
    pub files: AssetBundle,
    /// Paths present in both, now holding incoming content.
    pub overwritten: BTreeSet<AssetPath>,
    /// Paths only present in incoming.
    pub added: BTreeSet<AssetPath>,
}

impl MergedTree {
    /// Baseline paths carried over untouched.
    pub fn retained(&self) -> usize {
        self.files.len() - self.overwritten.len() - self.added.len()
    }
}
