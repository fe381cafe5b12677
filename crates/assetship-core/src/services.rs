//! External service interfaces.
//!
//! Every collaborator outside this crate sits behind one narrow trait:
//! - `CiProvider`: run status, artifact listing, artifact download
//! - `ImageRegistry`: pull, ephemeral instances, build, push, digest inspect
//! - `DeploymentNotifier`: downstream deploy trigger / dispatch event
//!
//! Real implementations live in `assetship-adapters`; in-memory fakes for
//! tests live in [`crate::fakes`].

use std::path::Path;

use assetship_state::ImageIdentity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactSummary, RunDescriptor, RunStatus, ServiceResult};

// ---------------------------------------------------------------------------
// CI provider
// ---------------------------------------------------------------------------

/// Read-only view of the upstream CI provider.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Status, conclusion and commit of a run.
    async fn run_status(&self, run: &RunDescriptor) -> ServiceResult<RunStatus>;

    /// All artifacts attached to a run.
    async fn list_artifacts(&self, run: &RunDescriptor) -> ServiceResult<Vec<ArtifactSummary>>;

    /// Download an artifact and extract its file tree into `dest`, preserving
    /// relative paths. `dest` exists and is empty when this is called.
    async fn download_artifact(
        &self,
        run: &RunDescriptor,
        artifact_id: &str,
        dest: &Path,
    ) -> ServiceResult<()>;
}

// ---------------------------------------------------------------------------
// Image registry
// ---------------------------------------------------------------------------

/// Image reference including tag (e.g. `ionutms/3d-model-server:latest`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on an ephemeral, never-started instance of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a pull. A missing image is a normal first-run condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Pulled,
    NotFound,
}

/// Container registry and local image toolchain.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Pull an image. Returns `PullOutcome::NotFound` when the registry has
    /// no such image.
    async fn pull(&self, image: &ImageRef) -> ServiceResult<PullOutcome>;

    /// Create (but do not start) an instance of a local image.
    async fn create_instance(&self, image: &ImageRef) -> ServiceResult<InstanceId>;

    /// Copy the *contents* of directory `src` inside the instance into the
    /// local directory `dest`.
    async fn copy_from_instance(
        &self,
        instance: &InstanceId,
        src: &str,
        dest: &Path,
    ) -> ServiceResult<()>;

    /// Remove an instance. Removing an unknown instance is not an error.
    async fn destroy_instance(&self, instance: &InstanceId) -> ServiceResult<()>;

    /// Build `context` into a local image tagged `image`.
    async fn build(&self, context: &Path, image: &ImageRef) -> ServiceResult<()>;

    /// Push a local image to the registry.
    async fn push(&self, image: &ImageRef) -> ServiceResult<()>;

    /// Content identity of the pushed image, independent of its tag.
    async fn inspect_digest(&self, image: &ImageRef) -> ServiceResult<ImageIdentity>;
}

// ---------------------------------------------------------------------------
// Deployment notifier
// ---------------------------------------------------------------------------

/// Provenance sent to downstream consumers when a deploy is warranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub event_type: String,
    pub image_reference: String,
    pub triggering_run_id: String,
    pub trigger_source: String,
}

/// A downstream consumer that must learn about a new deployment.
#[async_trait]
pub trait DeploymentNotifier: Send + Sync {
    /// Short consumer name for logs and reports.
    fn name(&self) -> &str;

    /// Deliver the notification. Called at most once per pipeline run.
    async fn notify(&self, payload: &DispatchPayload) -> ServiceResult<()>;
}
