//! Pipeline configuration.
//!
//! `new` + `with_*` builders. The binary fills them from flags and their
//! `ASSETSHIP_*` environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::AssetPath;
use crate::retry::RetryPolicy;
use crate::services::ImageRef;

/// Default directory holding the assets inside the published image.
pub const DEFAULT_IMAGE_ASSET_DIR: &str = "/usr/share/nginx/html/models";
/// Default asset directory relative to the build context.
pub const DEFAULT_CONTEXT_ASSET_DIR: &str = "models";
pub const DEFAULT_RECORD_PATH: &str = ".assetship/deployed-identity";
pub const DEFAULT_DISPATCH_EVENT: &str = "docker-image-updated";

/// Independent timeout per suspending stage (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Whole validation stage, retries included.
    pub validate_ms: u64,
    /// Whole fetch stage, retries included.
    pub fetch_ms: u64,
    /// Each artifact download attempt.
    pub download_ms: u64,
    /// Each baseline pull attempt. Large images legitimately take minutes.
    pub pull_ms: u64,
    /// Each remaining extraction step (instance creation, copy).
    pub extract_step_ms: u64,
    /// Context assembly, build, push and inspect together.
    pub publish_ms: u64,
    /// Each downstream notification.
    pub notify_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            validate_ms: 300_000,
            fetch_ms: 2_400_000,
            download_ms: 600_000,
            pull_ms: 1_800_000,
            extract_step_ms: 300_000,
            publish_ms: 1_800_000,
            notify_ms: 30_000,
        }
    }
}

impl StageTimeouts {
    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }

    pub fn pull(&self) -> Duration {
        Duration::from_millis(self.pull_ms)
    }

    pub fn extract_step(&self) -> Duration {
        Duration::from_millis(self.extract_step_ms)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn notify(&self) -> Duration {
        Duration::from_millis(self.notify_ms)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Published image reference including the fixed tag.
    pub image: ImageRef,
    /// Absolute directory inside the image that holds the asset tree.
    pub image_asset_dir: String,
    /// Where the merged tree goes inside the build context.
    pub context_asset_dir: AssetPath,
    /// External build definition (Dockerfile and friends).
    pub build_context: Option<PathBuf>,
    /// Deployment record file.
    pub record_path: PathBuf,
    /// Parent for per-run staging directories; system temp when `None`.
    pub staging_parent: Option<PathBuf>,
    /// `event_type` sent to downstream consumers.
    pub dispatch_event_type: String,
    pub read_retry: RetryPolicy,
    pub timeouts: StageTimeouts,
}

impl PipelineConfig {
    /// Config for `image` with every other value defaulted.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: ImageRef::new(image),
            image_asset_dir: DEFAULT_IMAGE_ASSET_DIR.to_string(),
            context_asset_dir: AssetPath::parse(DEFAULT_CONTEXT_ASSET_DIR)
                .expect("default asset dir is a valid relative path"),
            build_context: None,
            record_path: PathBuf::from(DEFAULT_RECORD_PATH),
            staging_parent: None,
            dispatch_event_type: DEFAULT_DISPATCH_EVENT.to_string(),
            read_retry: RetryPolicy::default(),
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn with_image_asset_dir(mut self, dir: impl Into<String>) -> Self {
        self.image_asset_dir = dir.into();
        self
    }

    /// Set the context asset directory; must be a plain relative path.
    pub fn with_context_asset_dir(mut self, dir: &str) -> crate::domain::Result<Self> {
        self.context_asset_dir = AssetPath::parse(dir)?;
        Ok(self)
    }

    pub fn with_build_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_context = Some(path.into());
        self
    }

    pub fn with_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.record_path = path.into();
        self
    }

    pub fn with_staging_parent(mut self, path: impl Into<PathBuf>) -> Self {
        self.staging_parent = Some(path.into());
        self
    }

    pub fn with_dispatch_event_type(mut self, event: impl Into<String>) -> Self {
        self.dispatch_event_type = event.into();
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry policy for the baseline pull: the read budget with the pull
    /// attempt limit.
    pub fn pull_retry(&self) -> RetryPolicy {
        self.read_retry.with_attempt_timeout_ms(self.timeouts.pull_ms)
    }

    /// Retry policy for artifact downloads: the read budget with the
    /// download attempt limit.
    pub fn download_retry(&self) -> RetryPolicy {
        self.read_retry.with_attempt_timeout_ms(self.timeouts.download_ms)
    }
}
