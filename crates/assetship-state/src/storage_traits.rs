//! Storage trait definitions for Assetship
//!
//! The deployment record is a single value: the [`ImageIdentity`] last known
//! to have been deployed. Reading and writing are two separate, narrowly
//! scoped operations so the gate and the propagator can share a handle
//! without any process-wide mutable state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ImageIdentity
// ---------------------------------------------------------------------------

/// Content-derived identity of a published image (e.g. `sha256:3f1c...`).
///
/// Opaque to this crate: two identities are equal iff their trimmed strings
/// are equal. The tag an image was pushed under plays no part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageIdentity(String);

impl ImageIdentity {
    /// Return the full identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines: the first 12 characters after any
    /// `algo:` prefix.
    pub fn short(&self) -> &str {
        let body = self.0.split_once(':').map(|(_, b)| b).unwrap_or(&self.0);
        match body.char_indices().nth(12) {
            Some((end, _)) => &body[..end],
            None => body,
        }
    }
}

impl TryFrom<String> for ImageIdentity {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(StorageError::InvalidIdentity { value: s });
        }
        Ok(ImageIdentity(trimmed.to_string()))
    }
}

impl TryFrom<&str> for ImageIdentity {
    type Error = StorageError;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        ImageIdentity::try_from(s.to_string())
    }
}

impl From<ImageIdentity> for String {
    fn from(id: ImageIdentity) -> Self {
        id.0
    }
}

impl std::fmt::Display for ImageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeploymentRecordStore
// ---------------------------------------------------------------------------

/// Persisted record of the last deployed image identity.
///
/// Guarantees:
/// - `read()` returns `None` when no deployment has ever been recorded.
/// - `write(id)` replaces the previous value atomically; a failed write
///   leaves the previous value readable.
#[async_trait]
pub trait DeploymentRecordStore: Send + Sync {
    /// Read the last recorded identity, if any.
    async fn read(&self) -> StorageResult<Option<ImageIdentity>>;

    /// Atomically replace the recorded identity.
    async fn write(&self, identity: &ImageIdentity) -> StorageResult<()>;
}
