//! File-backed deployment record.
//!
//! The record is a single text file holding one identity. A missing file, or
//! one that is empty after trimming, means "never deployed".

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{DeploymentRecordStore, ImageIdentity, StorageResult};

/// Deployment record stored as a text file at a well-known path.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    /// Create a store for `path`. Nothing is touched on disk until `write`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeploymentRecordStore for FileRecordStore {
    async fn read(&self) -> StorageResult<Option<ImageIdentity>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no deployment record yet");
                return Ok(None);
            }
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        ImageIdentity::try_from(content)
            .map(Some)
            .map_err(|e| StorageError::CorruptRecord {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    async fn write(&self, identity: &ImageIdentity) -> StorageResult<()> {
        let path = self.path.clone();
        let value = identity.as_str().to_string();
        tokio::task::spawn_blocking(move || write_atomic(&path, &value))
            .await
            .map_err(|e| StorageError::Persist(e.to_string()))?
    }
}

/// Atomic write: temp file in the same directory, then rename over the target.
fn write_atomic(path: &Path, value: &str) -> StorageResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
    writeln!(tmp, "{}", value).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::Persist(e.error.to_string()))?;
    Ok(())
}
