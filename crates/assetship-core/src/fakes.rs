//! In-memory fakes for the external service traits (testing only)
//!
//! `FakeCiProvider`, `FakeRegistry` and `FakeNotifier` satisfy the trait
//! contracts in [`crate::services`] without network or container tooling,
//! and count calls so tests can assert that a stage was never reached.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use assetship_state::ImageIdentity;
use async_trait::async_trait;

use crate::domain::{
    ArtifactSummary, AssetBundle, RunConclusion, RunDescriptor, RunState, RunStatus, ServiceError,
    ServiceResult,
};
use crate::services::*;

// ---------------------------------------------------------------------------
// FakeCiProvider
// ---------------------------------------------------------------------------

/// Call counts per `CiProvider` operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CiCalls {
    pub run_status: usize,
    pub list_artifacts: usize,
    pub download: usize,
}

#[derive(Debug, Default)]
struct CiState {
    calls: CiCalls,
    status_failures_left: usize,
    download_failures_left: usize,
}

/// CI provider serving one run status and a fixed set of artifacts.
#[derive(Debug)]
pub struct FakeCiProvider {
    status: RunStatus,
    /// Artifacts keyed by id: (name, contents).
    artifacts: BTreeMap<String, (String, AssetBundle)>,
    state: Mutex<CiState>,
}

impl FakeCiProvider {
    /// A completed, successful run with no artifacts.
    pub fn successful() -> Self {
        let mut status = RunStatus::new(RunState::Completed, Some(RunConclusion::Success));
        status.commit = Some("0a1b2c3d".to_string());
        Self::with_status(status)
    }

    pub fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            artifacts: BTreeMap::new(),
            state: Mutex::new(CiState::default()),
        }
    }

    pub fn with_artifact(mut self, name: &str, id: &str, files: AssetBundle) -> Self {
        self.artifacts
            .insert(id.to_string(), (name.to_string(), files));
        self
    }

    /// The first `n` status queries fail with a retryable error.
    pub fn fail_status_queries(self, n: usize) -> Self {
        self.state.lock().unwrap().status_failures_left = n;
        self
    }

    /// The first `n` downloads write a partial file, then fail with a
    /// retryable error.
    pub fn fail_downloads(self, n: usize) -> Self {
        self.state.lock().unwrap().download_failures_left = n;
        self
    }

    pub fn calls(&self) -> CiCalls {
        self.state.lock().unwrap().calls
    }
}

#[async_trait]
impl CiProvider for FakeCiProvider {
    async fn run_status(&self, _run: &RunDescriptor) -> ServiceResult<RunStatus> {
        let mut state = self.state.lock().unwrap();
        state.calls.run_status += 1;
        if state.status_failures_left > 0 {
            state.status_failures_left -= 1;
            return Err(ServiceError::Unavailable("503 from CI provider".to_string()));
        }
        Ok(self.status.clone())
    }

    async fn list_artifacts(&self, _run: &RunDescriptor) -> ServiceResult<Vec<ArtifactSummary>> {
        self.state.lock().unwrap().calls.list_artifacts += 1;
        Ok(self
            .artifacts
            .iter()
            .map(|(id, (name, files))| ArtifactSummary {
                name: name.clone(),
                id: id.clone(),
                size_bytes: files.total_bytes(),
            })
            .collect())
    }

    async fn download_artifact(
        &self,
        _run: &RunDescriptor,
        artifact_id: &str,
        dest: &Path,
    ) -> ServiceResult<()> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.calls.download += 1;
            let fail = state.download_failures_left > 0;
            if fail {
                state.download_failures_left -= 1;
            }
            fail
        };
        if fail {
            std::fs::write(dest.join("partial.part"), b"truncated")?;
            return Err(ServiceError::Unavailable("connection reset".to_string()));
        }

        let (_, files) = self
            .artifacts
            .get(artifact_id)
            .ok_or_else(|| ServiceError::NotFound(format!("artifact {artifact_id}")))?;
        files
            .write_to(dest)
            .map_err(|e| ServiceError::Rejected(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// FakeRegistry
// ---------------------------------------------------------------------------

/// Call counts per `ImageRegistry` operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounters {
    pub pulls: usize,
    pub instances_created: usize,
    pub instances_destroyed: usize,
    pub builds: usize,
    pub pushes: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    counters: RegistryCounters,
    published: Option<AssetBundle>,
    built: Option<AssetBundle>,
    copied_paths: Vec<String>,
    pull_failures_left: usize,
    fail_copy: bool,
    fail_build: bool,
    fail_push: bool,
    fail_inspect: bool,
    pull_delay: Duration,
    copy_delay: Duration,
    build_delay: Duration,
}

/// Registry holding at most one published image, modelled as its asset tree.
///
/// `build` reads the asset directory of the context, `push` publishes it,
/// and the identity is derived from the published content, so identical
/// trees always get identical identities.
#[derive(Debug)]
pub struct FakeRegistry {
    context_asset_dir: String,
    state: Mutex<RegistryState>,
}

impl FakeRegistry {
    /// `context_asset_dir` is where builds find the assets inside the
    /// context.
    pub fn new(context_asset_dir: &str) -> Self {
        Self {
            context_asset_dir: context_asset_dir.to_string(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Start with an already published image holding `files`.
    pub fn with_published(self, files: AssetBundle) -> Self {
        self.state.lock().unwrap().published = Some(files);
        self
    }

    pub fn fail_pulls(self, n: usize) -> Self {
        self.state.lock().unwrap().pull_failures_left = n;
        self
    }

    /// Copies out of an instance write a partial file, then fail.
    pub fn fail_copy(self) -> Self {
        self.state.lock().unwrap().fail_copy = true;
        self
    }

    pub fn fail_build(self) -> Self {
        self.state.lock().unwrap().fail_build = true;
        self
    }

    pub fn fail_push(self) -> Self {
        self.state.lock().unwrap().fail_push = true;
        self
    }

    pub fn fail_inspect(self) -> Self {
        self.state.lock().unwrap().fail_inspect = true;
        self
    }

    /// Every pull takes `delay` before answering.
    pub fn with_pull_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().pull_delay = delay;
        self
    }

    pub fn with_copy_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().copy_delay = delay;
        self
    }

    pub fn with_build_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().build_delay = delay;
        self
    }

    pub fn counters(&self) -> RegistryCounters {
        self.state.lock().unwrap().counters
    }

    /// Source paths passed to `copy_from_instance`, in call order.
    pub fn copied_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().copied_paths.clone()
    }

    /// Asset tree of the currently published image.
    pub fn published(&self) -> Option<AssetBundle> {
        self.state.lock().unwrap().published.clone()
    }

    /// Identity the registry reports for `files`.
    pub fn identity_of(files: &AssetBundle) -> ImageIdentity {
        ImageIdentity::try_from(format!("sha256:{}", files.fingerprint()))
            .expect("hex fingerprint is a valid identity")
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    async fn pull(&self, _image: &ImageRef) -> ServiceResult<PullOutcome> {
        let delay = self.state.lock().unwrap().pull_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.counters.pulls += 1;
        if state.pull_failures_left > 0 {
            state.pull_failures_left -= 1;
            return Err(ServiceError::Unavailable("registry timeout".to_string()));
        }
        Ok(match state.published {
            Some(_) => PullOutcome::Pulled,
            None => PullOutcome::NotFound,
        })
    }

    async fn create_instance(&self, image: &ImageRef) -> ServiceResult<InstanceId> {
        let mut state = self.state.lock().unwrap();
        if state.published.is_none() {
            return Err(ServiceError::NotFound(format!("no local image {image}")));
        }
        state.counters.instances_created += 1;
        Ok(InstanceId(format!(
            "fake-instance-{}",
            state.counters.instances_created
        )))
    }

    async fn copy_from_instance(
        &self,
        _instance: &InstanceId,
        src: &str,
        dest: &Path,
    ) -> ServiceResult<()> {
        let (files, fail, delay) = {
            let mut state = self.state.lock().unwrap();
            state.copied_paths.push(src.to_string());
            (state.published.clone().unwrap_or_default(), state.fail_copy, state.copy_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        std::fs::create_dir_all(dest)?;
        if fail {
            std::fs::write(dest.join("partial.glb"), b"trunc")?;
            return Err(ServiceError::Rejected(format!("could not find {src}")));
        }
        files
            .write_to(dest)
            .map_err(|e| ServiceError::Rejected(e.to_string()))
    }

    async fn destroy_instance(&self, _instance: &InstanceId) -> ServiceResult<()> {
        self.state.lock().unwrap().counters.instances_destroyed += 1;
        Ok(())
    }

    async fn build(&self, context: &Path, _image: &ImageRef) -> ServiceResult<()> {
        let (fail, delay) = {
            let mut state = self.state.lock().unwrap();
            state.counters.builds += 1;
            (state.fail_build, state.build_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ServiceError::Rejected("build step exited with 1".to_string()));
        }
        let files = AssetBundle::from_dir(&context.join(&self.context_asset_dir))
            .map_err(|e| ServiceError::Rejected(e.to_string()))?;
        self.state.lock().unwrap().built = Some(files);
        Ok(())
    }

    async fn push(&self, image: &ImageRef) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.counters.pushes += 1;
        if state.fail_push {
            return Err(ServiceError::Unavailable("denied: requested access to the resource is denied".to_string()));
        }
        let built = state
            .built
            .take()
            .ok_or_else(|| ServiceError::NotFound(format!("no local build of {image}")))?;
        state.published = Some(built);
        Ok(())
    }

    async fn inspect_digest(&self, image: &ImageRef) -> ServiceResult<ImageIdentity> {
        let state = self.state.lock().unwrap();
        if state.fail_inspect {
            return Err(ServiceError::Unavailable("inspect failed".to_string()));
        }
        state
            .published
            .as_ref()
            .map(Self::identity_of)
            .ok_or_else(|| ServiceError::NotFound(format!("no such image {image}")))
    }
}

// ---------------------------------------------------------------------------
// FakeNotifier
// ---------------------------------------------------------------------------

/// Downstream consumer that records every payload it accepts.
#[derive(Debug)]
pub struct FakeNotifier {
    name: String,
    fail: bool,
    delay: Option<Duration>,
    payloads: Mutex<Vec<DispatchPayload>>,
}

impl FakeNotifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            delay: None,
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Reject every notification.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Payloads accepted so far.
    pub fn payloads(&self) -> Vec<DispatchPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentNotifier for FakeNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, payload: &DispatchPayload) -> ServiceResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ServiceError::Unavailable("502 Bad Gateway".to_string()));
        }
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
