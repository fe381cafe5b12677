//! ArtifactFetcher: download a validated run's artifact into staging.

use std::path::Path;

use tracing::info;

use crate::domain::{AssetBundle, PipelineError, Result, ServiceError, ValidatedRun};
use crate::retry::{retry_read, RetryPolicy};
use crate::services::CiProvider;
use crate::staging::StagingArea;

pub struct ArtifactFetcher;

impl ArtifactFetcher {
    /// Download the resolved artifact into `dest` and load it as a bundle.
    ///
    /// `dest` is reset before every attempt so a partially extracted archive
    /// from a failed attempt never leaks into the next one. An artifact with
    /// no files is `EmptyArtifact`.
    pub async fn fetch(
        ci: &dyn CiProvider,
        run: &ValidatedRun,
        dest: &Path,
        retry: &RetryPolicy,
    ) -> Result<AssetBundle> {
        let descriptor = run.descriptor();
        let artifact = run.artifact();

        retry_read(retry, "artifact download", || async {
            if let Err(e) = StagingArea::reset_dir(dest) {
                return Err(ServiceError::Io(e));
            }
            ci.download_artifact(descriptor, &artifact.id, dest).await
        })
        .await?;

        let bundle = AssetBundle::from_dir(dest)?;
        if bundle.is_empty() {
            return Err(PipelineError::EmptyArtifact {
                name: artifact.name.clone(),
            });
        }

        let fingerprint = bundle.fingerprint();
        info!(
            artifact = %artifact.name,
            files = bundle.len(),
            bytes = bundle.total_bytes(),
            fingerprint = %&fingerprint[..12],
            "artifact fetched"
        );
        Ok(bundle)
    }
}
