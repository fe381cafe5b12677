//! GitHub Actions client.
//!
//! Implements `CiProvider` over the REST API (run status, run artifacts,
//! artifact zip download) and a `repository_dispatch` notifier.

use std::path::Path;
use std::time::Duration;

use assetship_core::{
    ArtifactSummary, CiProvider, DeploymentNotifier, DispatchPayload, RunConclusion,
    RunDescriptor, RunState, RunStatus, ServiceError, ServiceResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::{extract_zip, DEFAULT_MAX_ENTRY_BYTES};
use crate::http::{from_reqwest, from_status};
use crate::USER_AGENT;

const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
/// GitHub's maximum `per_page`.
const ARTIFACT_PAGE_SIZE: usize = 100;
const MAX_ARTIFACT_PAGES: u32 = 50;

/// GitHub configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API base URL
    pub api_url: String,
    /// Token with `actions:read` (and `contents:write` for dispatch)
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Connect timeout and per-request timeout for API calls, in seconds.
    /// Artifact downloads are bounded by the caller instead.
    pub timeout_secs: u64,
    /// Largest single file accepted from an artifact archive.
    pub max_entry_bytes: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_url: std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            token: std::env::var("GITHUB_TOKEN").ok(),
            timeout_secs: 60,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }
}

impl GithubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific API endpoint
    pub fn new(api_url: &str) -> Self {
        GithubConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            token: None,
            timeout_secs: 60,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_max_entry_bytes(mut self, bytes: u64) -> Self {
        self.max_entry_bytes = bytes;
        self
    }
}

impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    status: Option<String>,
    conclusion: Option<String>,
    head_sha: Option<String>,
}

impl From<WorkflowRun> for RunStatus {
    fn from(run: WorkflowRun) -> Self {
        let state = RunState::parse(run.status.as_deref().unwrap_or("pending"));
        let conclusion = run.conclusion.as_deref().map(RunConclusion::parse);
        let mut status = RunStatus::new(state, conclusion);
        status.commit = run.head_sha;
        status
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    total_count: Option<u64>,
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    id: u64,
    name: String,
    size_in_bytes: u64,
    #[serde(default)]
    expired: bool,
}

/// Body of `POST /repos/{repo}/dispatches`.
#[derive(Debug, Serialize)]
struct RepositoryDispatch<'a> {
    event_type: &'a str,
    client_payload: ClientPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ClientPayload<'a> {
    image_reference: &'a str,
    triggering_run_id: &'a str,
    trigger_source: &'a str,
}

impl<'a> From<&'a DispatchPayload> for RepositoryDispatch<'a> {
    fn from(payload: &'a DispatchPayload) -> Self {
        RepositoryDispatch {
            event_type: &payload.event_type,
            client_payload: ClientPayload {
                image_reference: &payload.image_reference,
                triggering_run_id: &payload.triggering_run_id,
                trigger_source: &payload.trigger_source,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// GitHub REST client
#[derive(Debug, Clone)]
pub struct GithubClient {
    config: GithubConfig,
    http: reqwest::Client,
}

impl GithubClient {
    /// Create a new GitHub client
    pub fn new(config: GithubConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Rejected(format!("building HTTP client: {e}")))?;
        Ok(GithubClient { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn api_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.request(method, path)
            .timeout(Duration::from_secs(self.config.timeout_secs))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, what: &str, path: &str) -> ServiceResult<T> {
        let resp = self
            .api_request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| from_reqwest(what, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(what, status, &body));
        }
        resp.json::<T>().await.map_err(|e| from_reqwest(what, e))
    }

    /// Send a `repository_dispatch` event to `repo` (`owner/name`).
    pub async fn repository_dispatch(&self, repo: &str, payload: &DispatchPayload) -> ServiceResult<()> {
        let what = "repository dispatch";
        let resp = self
            .api_request(reqwest::Method::POST, &format!("repos/{repo}/dispatches"))
            .json(&RepositoryDispatch::from(payload))
            .send()
            .await
            .map_err(|e| from_reqwest(what, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(what, status, &body));
        }
        Ok(())
    }
}

#[async_trait]
impl CiProvider for GithubClient {
    async fn run_status(&self, run: &RunDescriptor) -> ServiceResult<RunStatus> {
        let path = format!("repos/{}/actions/runs/{}", run.source, run.run_id);
        let wire: WorkflowRun = self.get_json("workflow run", &path).await?;
        let status = RunStatus::from(wire);
        debug!(run = %run, state = %status.state, "workflow run status");
        Ok(status)
    }

    /// Every page of the run's artifacts.
    async fn list_artifacts(&self, run: &RunDescriptor) -> ServiceResult<Vec<ArtifactSummary>> {
        let mut artifacts = Vec::new();
        for page in 1..=MAX_ARTIFACT_PAGES {
            let path = format!(
                "repos/{}/actions/runs/{}/artifacts?per_page={ARTIFACT_PAGE_SIZE}&page={page}",
                run.source, run.run_id
            );
            let list: ArtifactList = self.get_json("run artifacts", &path).await?;
            let received = list.artifacts.len();
            artifacts.extend(list.artifacts);

            let listed_all = list
                .total_count
                .is_some_and(|total| artifacts.len() as u64 >= total);
            if received < ARTIFACT_PAGE_SIZE || listed_all {
                break;
            }
        }
        Ok(into_summaries(artifacts))
    }

    async fn download_artifact(
        &self,
        run: &RunDescriptor,
        artifact_id: &str,
        dest: &Path,
    ) -> ServiceResult<()> {
        let what = "artifact download";
        let path = format!("repos/{}/actions/artifacts/{}/zip", run.source, artifact_id);
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| from_reqwest(what, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(what, status, &body));
        }
        let bytes = resp.bytes().await.map_err(|e| from_reqwest(what, e))?;
        info!(artifact_id, bytes = bytes.len(), "artifact downloaded");

        let dest = dest.to_path_buf();
        let max_entry_bytes = self.config.max_entry_bytes;
        tokio::task::spawn_blocking(move || extract_zip(&bytes, &dest, max_entry_bytes))
            .await
            .map_err(|e| ServiceError::Rejected(format!("archive extraction task: {e}")))??;
        Ok(())
    }
}

/// Expired artifacts cannot be downloaded and are left out.
fn into_summaries(artifacts: Vec<Artifact>) -> Vec<ArtifactSummary> {
    artifacts
        .into_iter()
        .filter(|a| !a.expired)
        .map(|a| ArtifactSummary {
            name: a.name,
            id: a.id.to_string(),
            size_bytes: a.size_in_bytes,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Repository dispatch notifier
// ---------------------------------------------------------------------------

/// Emits a `repository_dispatch` event to a downstream repository.
pub struct RepositoryDispatchNotifier {
    client: GithubClient,
    repo: String,
}

impl RepositoryDispatchNotifier {
    pub fn new(client: GithubClient, repo: impl Into<String>) -> Self {
        Self {
            client,
            repo: repo.into(),
        }
    }
}

#[async_trait]
impl DeploymentNotifier for RepositoryDispatchNotifier {
    fn name(&self) -> &str {
        "repository-dispatch"
    }

    async fn notify(&self, payload: &DispatchPayload) -> ServiceResult<()> {
        self.client.repository_dispatch(&self.repo, payload).await?;
        info!(repo = %self.repo, event_type = %payload.event_type, "repository dispatch sent");
        Ok(())
    }
}
