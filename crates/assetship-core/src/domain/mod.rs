//! Domain models for Assetship.
//!
//! Canonical definitions for the core entities:
//! - `RunDescriptor` / `RunStatus`: the upstream CI run being published
//! - `TriggerSource`: why this pipeline execution was started
//! - `AssetBundle` / `MergedTree`: the asset trees moving through the pipeline
//! - `PipelineError` / `ServiceError`: the failure taxonomy

pub mod bundle;
pub mod error;
pub mod run;
pub mod trigger;

// Re-export main types and errors
pub use bundle::{AssetBundle, AssetPath, MergedTree};
pub use error::{PipelineError, Result, ServiceError, ServiceResult, Stage};
pub use run::{ArtifactSummary, RunConclusion, RunDescriptor, RunState, RunStatus, ValidatedRun};
pub use trigger::TriggerSource;
