//! ContentExtractor: recover the asset tree of the currently published image.
//!
//! Never fails the pipeline. A missing image is the first-run case; any
//! other problem degrades to an empty baseline with a warning, because the
//! new build must still be attempted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{AssetBundle, PipelineError, Result};
use crate::obs;
use crate::retry::{retry_read, RetryPolicy};
use crate::services::{ImageRef, ImageRegistry, InstanceId, PullOutcome};
use crate::staging::StagingArea;

/// Where the baseline came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BaselineSource {
    /// No image published yet.
    FirstRun,
    /// Copied out of the published image.
    Extracted,
    /// Extraction failed; treated as empty. Holds the failure message.
    Degraded(String),
}

/// Baseline asset tree plus its provenance.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub bundle: AssetBundle,
    pub source: BaselineSource,
}

impl Baseline {
    fn empty(source: BaselineSource) -> Self {
        Self {
            bundle: AssetBundle::new(),
            source,
        }
    }
}

/// Owns an ephemeral instance until it is destroyed.
///
/// Dropping the guard with the instance still alive (the extraction future
/// was cancelled) hands the destroy to a background task.
struct InstanceGuard {
    registry: Arc<dyn ImageRegistry>,
    instance: Option<InstanceId>,
}

impl InstanceGuard {
    fn new(registry: Arc<dyn ImageRegistry>, instance: InstanceId) -> Self {
        Self {
            registry,
            instance: Some(instance),
        }
    }

    async fn destroy(mut self) {
        if let Some(instance) = &self.instance {
            if let Err(e) = self.registry.destroy_instance(instance).await {
                warn!(instance = %instance, error = %e, "failed to destroy ephemeral instance");
            }
        }
        self.instance = None;
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        let registry = self.registry.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(instance = %instance, "extraction cancelled, destroying instance in background");
                handle.spawn(async move {
                    if let Err(e) = registry.destroy_instance(&instance).await {
                        warn!(instance = %instance, error = %e, "failed to destroy ephemeral instance");
                    }
                });
            }
            Err(_) => {
                warn!(instance = %instance, "extraction cancelled outside a runtime, instance left behind");
            }
        }
    }
}

pub struct ContentExtractor;

impl ContentExtractor {
    /// Pull `image` and copy `image_asset_dir` out of an ephemeral instance
    /// into `dest`.
    ///
    /// `pull_retry` bounds each pull attempt; `step_timeout` bounds instance
    /// creation and the copy individually. The instance is destroyed whether
    /// the copy succeeded, failed or was cancelled.
    pub async fn extract(
        registry: &Arc<dyn ImageRegistry>,
        image: &ImageRef,
        image_asset_dir: &str,
        dest: &Path,
        pull_retry: &RetryPolicy,
        step_timeout: Duration,
    ) -> Baseline {
        match Self::try_extract(registry, image, image_asset_dir, dest, pull_retry, step_timeout).await {
            Ok(Some(bundle)) => {
                info!(image = %image, files = bundle.len(), "baseline extracted");
                Baseline {
                    bundle,
                    source: BaselineSource::Extracted,
                }
            }
            Ok(None) => {
                info!(image = %image, "no published image yet, starting from empty baseline");
                Baseline::empty(BaselineSource::FirstRun)
            }
            Err(e) => {
                obs::emit_extraction_degraded(image.as_str(), &e);
                if let Err(io) = StagingArea::reset_dir(dest) {
                    warn!(error = %io, "failed to clear partial baseline");
                }
                Baseline::empty(BaselineSource::Degraded(e.to_string()))
            }
        }
    }

    async fn try_extract(
        registry: &Arc<dyn ImageRegistry>,
        image: &ImageRef,
        image_asset_dir: &str,
        dest: &Path,
        pull_retry: &RetryPolicy,
        step_timeout: Duration,
    ) -> Result<Option<AssetBundle>> {
        let outcome = match retry_read(pull_retry, "baseline image pull", || registry.pull(image)).await {
            Ok(outcome) => outcome,
            Err(failure) if failure.is_not_found() => PullOutcome::NotFound,
            Err(failure) => {
                return Err(PipelineError::ExtractionFailed(format!(
                    "pull failed after {} attempt(s): {}",
                    failure.attempts, failure.last_error
                )))
            }
        };
        if outcome == PullOutcome::NotFound {
            return Ok(None);
        }

        let instance = match tokio::time::timeout(step_timeout, registry.create_instance(image)).await
        {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => {
                return Err(PipelineError::ExtractionFailed(format!(
                    "instance creation failed: {e}"
                )))
            }
            Err(_) => {
                return Err(PipelineError::ExtractionFailed(
                    "instance creation timed out".to_string(),
                ))
            }
        };

        let guard = InstanceGuard::new(registry.clone(), instance.clone());
        let copied = tokio::time::timeout(
            step_timeout,
            registry.copy_from_instance(&instance, image_asset_dir, dest),
        )
        .await;
        guard.destroy().await;

        match copied {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(PipelineError::ExtractionFailed(format!("copy failed: {e}"))),
            Err(_) => {
                return Err(PipelineError::ExtractionFailed(format!(
                    "copy timed out after {}ms",
                    step_timeout.as_millis()
                )))
            }
        }

        let bundle = AssetBundle::from_dir(dest)
            .map_err(|e| PipelineError::ExtractionFailed(format!("reading baseline: {e}")))?;
        Ok(Some(bundle))
    }
}
