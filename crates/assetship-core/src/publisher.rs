//! ImagePublisher: assemble the build context, build, push, and read back the
//! content identity of what was pushed.
//!
//! Nothing here is retried. A failed build or push ends the run before any
//! identity is computed, so it can never look like "nothing changed".

use std::path::{Path, PathBuf};

use assetship_state::ImageIdentity;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{AssetPath, MergedTree, PipelineError, Result};
use crate::services::{ImageRef, ImageRegistry};
use crate::staging::{copy_tree, StagingArea};

/// An image that was built, pushed, and inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    pub image: ImageRef,
    pub identity: ImageIdentity,
}

/// Build context description: an external directory holding the build
/// definition, and where inside it the merged assets go.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Directory with the build definition. `None` means the merged tree is
    /// the entire context.
    pub source: Option<PathBuf>,
    /// Relative directory inside the context that receives the asset tree.
    pub asset_dir: AssetPath,
}

pub struct ImagePublisher;

impl ImagePublisher {
    /// Lay the context out under `context_dir`, then build, push and inspect.
    pub async fn publish(
        registry: &dyn ImageRegistry,
        merged: &MergedTree,
        build: &BuildContext,
        context_dir: &Path,
        image: &ImageRef,
    ) -> Result<PublishedImage> {
        Self::assemble_context(merged, build, context_dir)?;

        registry
            .build(context_dir, image)
            .await
            .map_err(|e| PipelineError::BuildFailed(e.to_string()))?;
        info!(image = %image, "image built");

        registry
            .push(image)
            .await
            .map_err(|e| PipelineError::PushFailed(e.to_string()))?;
        info!(image = %image, "image pushed");

        let identity = registry
            .inspect_digest(image)
            .await
            .map_err(|e| PipelineError::InspectFailed(e.to_string()))?;
        info!(image = %image, identity = %identity.short(), "published image identity");

        Ok(PublishedImage {
            image: image.clone(),
            identity,
        })
    }

    /// Copy the build definition (minus any stale asset directory) and write
    /// the merged tree into `asset_dir`.
    fn assemble_context(merged: &MergedTree, build: &BuildContext, context_dir: &Path) -> Result<()> {
        StagingArea::reset_dir(context_dir)?;
        let asset_root = build.asset_dir.join_onto(context_dir);
        if let Some(source) = &build.source {
            if !source.is_dir() {
                return Err(PipelineError::BuildFailed(format!(
                    "build context {} is not a directory",
                    source.display()
                )));
            }
            copy_tree(source, context_dir)?;
            StagingArea::reset_dir(&asset_root)?;
        }
        merged.files.write_to(&asset_root)?;
        debug!(
            context = %context_dir.display(),
            files = merged.files.len(),
            "build context assembled"
        );
        Ok(())
    }
}
