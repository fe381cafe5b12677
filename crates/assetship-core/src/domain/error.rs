//! Domain-level error taxonomy for Assetship.
//!
//! Fatal errors abort the pipeline and leave the deployment record exactly
//! as it was. Non-fatal errors are folded into the pipeline report instead
//! of being returned.

use assetship_state::StorageError;
use serde::Serialize;

use crate::domain::run::{RunConclusion, RunState};

/// Pipeline stage, used to attribute timeouts and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Fetch,
    Extract,
    Merge,
    Publish,
    Gate,
    Dispatch,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Extract => "extract",
            Stage::Merge => "merge",
            Stage::Publish => "publish",
            Stage::Gate => "gate",
            Stage::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors returned by external-service adapters (CI provider, registry,
/// notification endpoints).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The requested object does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient failure (network, 5xx, timeout). Safe to retry for reads.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service answered and refused the request (4xx, bad credentials).
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Whether an idempotent read may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

/// Result type for external-service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Assetship pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("upstream run {run_id} not ready: status={status}, conclusion={}", .conclusion.as_ref().map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    UpstreamNotReady {
        run_id: String,
        status: RunState,
        conclusion: Option<RunConclusion>,
    },

    #[error("artifact '{name}' not found in run {run_id}; available: [{}]", .available.join(", "))]
    ArtifactNotFound {
        name: String,
        run_id: String,
        available: Vec<String>,
    },

    #[error("artifact '{name}' contains no files")]
    EmptyArtifact { name: String },

    #[error("{operation} unavailable after {attempts} attempt(s): {reason}")]
    FetchUnavailable {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("baseline extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("image push failed: {0}")]
    PushFailed(String),

    #[error("digest inspection failed: {0}")]
    InspectFailed(String),

    #[error("deploy notification to {consumer} failed: {reason}")]
    DeployNotificationFailed { consumer: String, reason: String },

    #[error("{stage} stage timed out after {after_ms}ms")]
    Timeout { stage: Stage, after_ms: u64 },

    #[error("invalid asset path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Fatal errors abort the run; the others degrade the result.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::ExtractionFailed(_) | PipelineError::DeployNotificationFailed { .. }
        )
    }
}

/// Result type for Assetship pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
