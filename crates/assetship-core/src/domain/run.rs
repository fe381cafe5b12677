//! Upstream CI run descriptors and status.

use serde::{Deserialize, Serialize};

/// Identifies the upstream CI run whose artifact is being published.
///
/// Supplied by the trigger event and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDescriptor {
    /// Source repository or project (e.g. `owner/models`).
    pub source: String,
    /// Run identifier within the source.
    pub run_id: String,
    /// Name of the artifact to publish from the run.
    pub artifact_name: String,
}

impl RunDescriptor {
    pub fn new(
        source: impl Into<String>,
        run_id: impl Into<String>,
        artifact_name: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            run_id: run_id.into(),
            artifact_name: artifact_name.into(),
        }
    }
}

impl std::fmt::Display for RunDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} ({})", self.source, self.run_id, self.artifact_name)
    }
}

/// Lifecycle state of a CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Queued, waiting, requested or otherwise not started.
    Pending,
    InProgress,
    Completed,
}

impl RunState {
    /// Parse a provider status string. Unrecognised values are treated as
    /// pending so they can never pass validation.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "completed" => RunState::Completed,
            "in_progress" | "in-progress" => RunState::InProgress,
            _ => RunState::Pending,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunState::Pending => "pending",
            RunState::InProgress => "in_progress",
            RunState::Completed => "completed",
        })
    }
}

/// Final outcome of a completed CI run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
    Stale,
    Unknown,
}

impl RunConclusion {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "success" => RunConclusion::Success,
            "failure" | "startup_failure" => RunConclusion::Failure,
            "cancelled" => RunConclusion::Cancelled,
            "skipped" => RunConclusion::Skipped,
            "timed_out" => RunConclusion::TimedOut,
            "action_required" => RunConclusion::ActionRequired,
            "neutral" => RunConclusion::Neutral,
            "stale" => RunConclusion::Stale,
            _ => RunConclusion::Unknown,
        }
    }
}

impl std::fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::Skipped => "skipped",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::Neutral => "neutral",
            RunConclusion::Stale => "stale",
            RunConclusion::Unknown => "unknown",
        })
    }
}

/// Status snapshot fetched read-only from the CI provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
    pub conclusion: Option<RunConclusion>,
    /// Head commit the run built, when the provider reports one.
    pub commit: Option<String>,
}

impl RunStatus {
    pub fn new(state: RunState, conclusion: Option<RunConclusion>) -> Self {
        Self {
            state,
            conclusion,
            commit: None,
        }
    }

    /// Completed and concluded with success.
    pub fn is_successful(&self) -> bool {
        self.state == RunState::Completed && self.conclusion == Some(RunConclusion::Success)
    }
}

/// One artifact listed for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub name: String,
    /// Provider-opaque artifact id.
    pub id: String,
    pub size_bytes: u64,
}

/// A run that passed validation, with its artifact resolved.
///
/// Only `RunValidator` constructs this, so holding one is proof that the run
/// completed successfully and the named artifact exists.
#[derive(Debug, Clone)]
pub struct ValidatedRun {
    descriptor: RunDescriptor,
    status: RunStatus,
    artifact: ArtifactSummary,
}

impl ValidatedRun {
    pub(crate) fn new(
        descriptor: RunDescriptor,
        status: RunStatus,
        artifact: ArtifactSummary,
    ) -> Self {
        Self {
            descriptor,
            status,
            artifact,
        }
    }

    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn artifact(&self) -> &ArtifactSummary {
        &self.artifact
    }
}
