//! Per-run staging area.
//!
//! All working files (fetched artifact, extracted baseline, build context)
//! live under one temporary directory that is removed when the
//! [`StagingArea`] is dropped: on success, on error, and when the pipeline
//! future is cancelled.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Scratch directory tree for one pipeline execution.
#[derive(Debug)]
pub struct StagingArea {
    root: TempDir,
}

impl StagingArea {
    /// Create under the system temp directory.
    pub fn new() -> std::io::Result<Self> {
        Self::with_root(tempfile::Builder::new().prefix("assetship-").tempdir()?)
    }

    /// Create under `parent`, which must exist.
    pub fn new_in(parent: &Path) -> std::io::Result<Self> {
        Self::with_root(
            tempfile::Builder::new()
                .prefix("assetship-")
                .tempdir_in(parent)?,
        )
    }

    fn with_root(root: TempDir) -> std::io::Result<Self> {
        let area = Self { root };
        std::fs::create_dir_all(area.incoming_dir())?;
        std::fs::create_dir_all(area.baseline_dir())?;
        Ok(area)
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Where the fetched artifact is extracted.
    pub fn incoming_dir(&self) -> PathBuf {
        self.root.path().join("incoming")
    }

    /// Where the previously published asset tree is copied out to.
    pub fn baseline_dir(&self) -> PathBuf {
        self.root.path().join("baseline")
    }

    /// Where the image build context is assembled.
    pub fn context_dir(&self) -> PathBuf {
        self.root.path().join("context")
    }

    /// Remove and recreate `dir`, leaving it empty.
    pub fn reset_dir(dir: &Path) -> std::io::Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)
    }
}

/// Recursively copy regular files and directories from `src` into `dst`.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&path, &target)?;
        } else if file_type.is_file() {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}
