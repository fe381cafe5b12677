//! Docker CLI driver implementing `ImageRegistry`.
//!
//! Every operation shells out to the `docker` binary. Pull output is
//! streamed line by line into `debug!` events, and a reported success is
//! verified with `docker image inspect` before the image is used.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use assetship_core::{
    ImageIdentity, ImageRef, ImageRegistry, InstanceId, PullOutcome, ServiceError, ServiceResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Docker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker binary
    pub binary: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        DockerConfig {
            binary: std::env::var("DOCKER_BIN").unwrap_or_else(|_| "docker".to_string()),
        }
    }
}

impl DockerConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(binary: &str) -> Self {
        DockerConfig {
            binary: binary.to_string(),
        }
    }
}

/// Captured result of one docker invocation.
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Docker CLI client
#[derive(Debug, Clone)]
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        DockerCli { config }
    }

    /// Create client from environment variables
    pub fn from_env() -> Self {
        Self::new(DockerConfig::from_env())
    }

    /// Whether the docker binary runs at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.binary)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn run<I, S>(&self, args: I) -> ServiceResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Whether `image` exists in the local image store.
    async fn image_present(&self, image: &ImageRef) -> ServiceResult<bool> {
        let out = self.run(["image", "inspect", image.as_str()]).await?;
        Ok(out.success)
    }
}

#[async_trait]
impl ImageRegistry for DockerCli {
    async fn pull(&self, image: &ImageRef) -> ServiceResult<PullOutcome> {
        info!(image = %image, "pulling image");
        let mut child = Command::new(&self.config.binary)
            .args(["pull", image.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Rejected("docker pull stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ServiceError::Rejected("docker pull stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_progress(&line) {
                Some((layer, status)) => debug!(image = %image, layer, status, "pull progress"),
                None if !line.trim().is_empty() => debug!(image = %image, status = %line.trim(), "pull progress"),
                None => {}
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(classify_pull_failure(image, &stderr));
        }

        if !self.image_present(image).await? {
            warn!(image = %image, "pull reported success but image is not present locally");
            return Err(ServiceError::Unavailable(format!(
                "cannot verify that {image} was pulled"
            )));
        }
        info!(image = %image, "image pulled");
        Ok(PullOutcome::Pulled)
    }

    async fn create_instance(&self, image: &ImageRef) -> ServiceResult<InstanceId> {
        let out = self.run(["create", image.as_str()]).await?;
        if !out.success {
            return Err(classify("docker create", &out.stderr));
        }
        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(ServiceError::Rejected("docker create returned no container id".to_string()));
        }
        debug!(image = %image, container = %id, "ephemeral container created");
        Ok(InstanceId(id))
    }

    async fn copy_from_instance(
        &self,
        instance: &InstanceId,
        src: &str,
        dest: &Path,
    ) -> ServiceResult<()> {
        tokio::fs::create_dir_all(dest).await?;
        // Trailing `/.` copies the directory contents rather than the directory.
        let source = format!("{}:{}/.", instance, src.trim_end_matches('/'));
        let out = self
            .run([OsStr::new("cp"), OsStr::new(&source), dest.as_os_str()])
            .await?;
        if !out.success {
            return Err(classify("docker cp", &out.stderr));
        }
        Ok(())
    }

    async fn destroy_instance(&self, instance: &InstanceId) -> ServiceResult<()> {
        let out = self.run(["rm", "-f", instance.0.as_str()]).await?;
        if !out.success && !out.stderr.contains("No such container") {
            return Err(classify("docker rm", &out.stderr));
        }
        debug!(container = %instance, "ephemeral container removed");
        Ok(())
    }

    async fn build(&self, context: &Path, image: &ImageRef) -> ServiceResult<()> {
        info!(image = %image, context = %context.display(), "building image");
        let out = self
            .run([
                OsStr::new("build"),
                OsStr::new("-t"),
                OsStr::new(image.as_str()),
                context.as_os_str(),
            ])
            .await?;
        if !out.success {
            return Err(ServiceError::Rejected(format!(
                "docker build: {}",
                tail(&out.stderr)
            )));
        }
        Ok(())
    }

    async fn push(&self, image: &ImageRef) -> ServiceResult<()> {
        info!(image = %image, "pushing image");
        let out = self.run(["push", image.as_str()]).await?;
        if !out.success {
            return Err(classify("docker push", &out.stderr));
        }
        Ok(())
    }

    async fn inspect_digest(&self, image: &ImageRef) -> ServiceResult<ImageIdentity> {
        let out = self
            .run([
                "image",
                "inspect",
                "--format",
                "{{json .RepoDigests}}",
                image.as_str(),
            ])
            .await?;
        if !out.success {
            return Err(classify("docker image inspect", &out.stderr));
        }
        let digests: Vec<String> = serde_json::from_str(out.stdout.trim())
            .map_err(|e| ServiceError::Rejected(format!("unexpected inspect output: {e}")))?;
        let digest = select_repo_digest(image, &digests).ok_or_else(|| {
            ServiceError::NotFound(format!("{image} has no registry digest; was it pushed?"))
        })?;
        ImageIdentity::try_from(digest).map_err(|e| ServiceError::Rejected(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// `"<layer>: <status>"` progress lines. Summary lines such as
/// `Digest: sha256:...` or `Status: ...` are not layer progress.
fn parse_progress(line: &str) -> Option<(&str, &str)> {
    let (layer, status) = line.trim().split_once(": ")?;
    let is_layer = layer.len() >= 12 && layer.chars().all(|c| c.is_ascii_hexdigit());
    is_layer.then_some((layer, status))
}

/// Repository part of a reference: drops the tag and any digest.
fn repository(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    match without_digest.rfind(':') {
        // A colon after the last slash is a tag; before it, a registry port.
        Some(i) if !without_digest[i..].contains('/') => &without_digest[..i],
        _ => without_digest,
    }
}

/// Pick the `sha256:` digest for the image's own repository from
/// `RepoDigests` (`repo@sha256:...` entries).
fn select_repo_digest<'a>(image: &ImageRef, digests: &'a [String]) -> Option<&'a str> {
    let repo = repository(image.as_str());
    let mut fallback = None;
    for entry in digests {
        let Some((entry_repo, digest)) = entry.split_once('@') else {
            continue;
        };
        if entry_repo == repo || entry_repo.ends_with(&format!("/{repo}")) {
            return Some(digest);
        }
        fallback.get_or_insert(digest);
    }
    fallback
}

fn classify_pull_failure(image: &ImageRef, stderr: &str) -> ServiceError {
    let lower = stderr.to_lowercase();
    if lower.contains("manifest unknown")
        || lower.contains("not found")
        || lower.contains("repository does not exist")
        || lower.contains("pull access denied")
    {
        ServiceError::NotFound(format!("{image}: {}", tail(stderr)))
    } else {
        classify("docker pull", stderr)
    }
}

/// Network-looking failures are retryable; everything else is rejected.
fn classify(what: &str, stderr: &str) -> ServiceError {
    let lower = stderr.to_lowercase();
    let transient = [
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "tls handshake",
        "toomanyrequests",
        "503 service unavailable",
        "502 bad gateway",
        "cannot connect to the docker daemon",
    ];
    let detail = format!("{what}: {}", tail(stderr));
    if transient.iter().any(|t| lower.contains(t)) {
        ServiceError::Unavailable(detail)
    } else {
        ServiceError::Rejected(detail)
    }
}

/// Last non-empty line, which is where docker puts the actual error.
fn tail(output: &str) -> &str {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lines() {
        assert_eq!(
            parse_progress("a3ed95caeb02: Downloading  12.3MB/40MB"),
            Some(("a3ed95caeb02", "Downloading  12.3MB/40MB"))
        );
        assert_eq!(parse_progress("Digest: sha256:abc"), None);
        assert_eq!(parse_progress("latest: Pulling from owner/server"), None);
        assert_eq!(parse_progress("Status: Downloaded newer image"), None);
    }

    #[test]
    fn repository_strips_tag_but_not_port() {
        assert_eq!(repository("owner/server:latest"), "owner/server");
        assert_eq!(repository("registry:5000/owner/server:1.2"), "registry:5000/owner/server");
        assert_eq!(repository("registry:5000/owner/server"), "registry:5000/owner/server");
        assert_eq!(repository("owner/server@sha256:abc"), "owner/server");
    }

    #[test]
    fn repo_digest_prefers_own_repository() {
        let image = ImageRef::new("owner/server:latest");
        let digests = vec![
            "mirror.example.com/other/thing@sha256:111".to_string(),
            "docker.io/owner/server@sha256:222".to_string(),
        ];
        assert_eq!(select_repo_digest(&image, &digests), Some("sha256:222"));
        assert_eq!(select_repo_digest(&image, &[]), None);
    }

    #[test]
    fn pull_failure_classification() {
        let image = ImageRef::new("owner/server:latest");
        let missing = classify_pull_failure(
            &image,
            "Error response from daemon: manifest for owner/server:latest not found: manifest unknown",
        );
        assert!(matches!(missing, ServiceError::NotFound(_)));

        let flaky = classify_pull_failure(
            &image,
            "Error response from daemon: Get \"https://registry-1.docker.io/v2/\": net/http: TLS handshake timeout",
        );
        assert!(flaky.is_retryable());
    }

    #[test]
    fn tail_picks_last_line() {
        assert_eq!(tail("step 1\nstep 2\nERROR: failed to solve\n\n"), "ERROR: failed to solve");
        assert_eq!(tail(""), "no output");
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let docker = DockerCli::new(DockerConfig::new("/nonexistent/docker-binary"));
        assert!(!docker.is_available().await);
        let err = docker
            .push(&ImageRef::new("owner/server:latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Io(_)));
    }
}
