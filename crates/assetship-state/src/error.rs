//! Error types for assetship-state

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the record persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing the record file failed
    #[error("record I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record exists but does not hold a usable identity
    #[error("corrupt deployment record at {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    /// An identity string failed validation
    #[error("invalid image identity: {value:?}")]
    InvalidIdentity { value: String },

    /// The atomic rename of the new record failed
    #[error("failed to persist deployment record: {0}")]
    Persist(String),

    /// Backend refused the write (used by fakes and remote backends)
    #[error("record backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_the_path() {
        let err = StorageError::io(
            "/var/lib/assetship/last_digest",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/var/lib/assetship/last_digest"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn invalid_identity_quotes_value() {
        let err = StorageError::InvalidIdentity {
            value: "  ".to_string(),
        };
        assert!(err.to_string().contains("\"  \""));
    }
}
