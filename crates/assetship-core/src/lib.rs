//! Assetship Core Library
//!
//! Publish-and-gate pipeline for asset-serving images: validate an upstream
//! CI run, fetch its artifact, merge it over the asset tree of the currently
//! published image, republish, and deploy only when the image identity
//! changed (or the trigger forces it).

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod extractor;
pub mod fakes;
pub mod fetcher;
pub mod gate;
pub mod merge;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod publisher;
pub mod retry;
pub mod services;
pub mod staging;
pub mod telemetry;
pub mod validator;

pub use domain::{
    ArtifactSummary, AssetBundle, AssetPath, MergedTree, PipelineError, Result, RunConclusion,
    RunDescriptor, RunState, RunStatus, ServiceError, ServiceResult, Stage, TriggerSource,
    ValidatedRun,
};

pub use assetship_state::{DeploymentRecordStore, FileRecordStore, ImageIdentity, StorageError};

pub use config::{PipelineConfig, StageTimeouts};
pub use dispatch::{dispatch_payload, DispatchOutcome, DispatchPropagator, NotificationFailure};
pub use extractor::{Baseline, BaselineSource, ContentExtractor};
pub use fetcher::ArtifactFetcher;
pub use gate::{decide, evaluate_gate, DecisionReason, DeployDecision, DeploymentGate, GateState};
pub use merge::{merge, MergeEngine};
pub use pipeline::{
    MergeSummary, PipelineOutcome, PipelineReport, PipelineRequest, PipelineServices,
    PublishPipeline,
};
pub use publisher::{BuildContext, ImagePublisher, PublishedImage};
pub use retry::{retry_read, ReadFailure, RetryPolicy};
pub use services::{
    CiProvider, DeploymentNotifier, DispatchPayload, ImageRef, ImageRegistry, InstanceId,
    PullOutcome,
};
pub use staging::StagingArea;
pub use validator::RunValidator;

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Assetship version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
