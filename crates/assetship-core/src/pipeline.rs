//! Pipeline driver: one sequential chain from run validation to dispatch.
//!
//! ```text
//! validate → fetch → extract → merge → publish → gate → dispatch
//! ```
//!
//! Fatal errors end the run with `Err` and leave the deployment record as it
//! was. Non-fatal problems (degraded extraction, failed notifications) are
//! folded into the [`PipelineReport`]. Staging lives in a [`StagingArea`]
//! owned by the run future, so it is removed on success, on error and on
//! cancellation alike.
//!
//! At most one execution may run against a given deployment record at a
//! time; callers serialize executions externally.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assetship_state::{DeploymentRecordStore, ImageIdentity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::dispatch::{dispatch_payload, DispatchOutcome, DispatchPropagator};
use crate::domain::{MergedTree, PipelineError, Result, RunDescriptor, Stage, TriggerSource};
use crate::extractor::{BaselineSource, ContentExtractor};
use crate::fetcher::ArtifactFetcher;
use crate::gate::{evaluate_gate, DeployDecision, DeploymentGate};
use crate::merge::MergeEngine;
use crate::metrics::METRICS;
use crate::obs;
use crate::publisher::{BuildContext, ImagePublisher, PublishedImage};
use crate::services::{CiProvider, DeploymentNotifier, ImageRegistry};
use crate::staging::StagingArea;
use crate::validator::RunValidator;

/// External collaborators for one pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub ci: Arc<dyn CiProvider>,
    pub registry: Arc<dyn ImageRegistry>,
    pub notifiers: Vec<Arc<dyn DeploymentNotifier>>,
    pub record: Arc<dyn DeploymentRecordStore>,
}

/// One trigger event.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub run: RunDescriptor,
    pub trigger: TriggerSource,
    /// Force a deploy regardless of trigger classification.
    pub force: bool,
}

impl PipelineRequest {
    pub fn new(run: RunDescriptor, trigger: TriggerSource) -> Self {
        Self {
            run,
            trigger,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn is_forced(&self) -> bool {
        self.force || self.trigger.is_forced()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Deployed, every consumer notified, record updated.
    Deployed,
    /// Deployed and recorded, but some consumer was not informed. Re-trigger
    /// the notification independently.
    DeployedDegraded,
    /// Published image is identical to the recorded one; nothing dispatched.
    Unchanged,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::Deployed => "deployed",
            PipelineOutcome::DeployedDegraded => "deployed_degraded",
            PipelineOutcome::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub total: usize,
    pub overwritten: Vec<String>,
    pub added: Vec<String>,
    pub retained: usize,
}

impl From<&MergedTree> for MergeSummary {
    fn from(tree: &MergedTree) -> Self {
        Self {
            total: tree.files.len(),
            overwritten: tree.overwritten.iter().map(|p| p.to_string()).collect(),
            added: tree.added.iter().map(|p| p.to_string()).collect(),
            retained: tree.retained(),
        }
    }
}

/// Everything a successful execution did.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub execution_id: Uuid,
    pub run: RunDescriptor,
    pub trigger: TriggerSource,
    pub forced: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: PipelineOutcome,
    pub baseline: BaselineSource,
    pub merge: MergeSummary,
    pub published: PublishedImage,
    pub decision: DeployDecision,
    pub dispatch: DispatchOutcome,
}

pub struct PublishPipeline {
    config: PipelineConfig,
    services: PipelineServices,
}

impl PublishPipeline {
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole chain for one trigger event.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineReport> {
        let execution_id = Uuid::new_v4();
        let span = obs::pipeline_span(&execution_id.to_string(), &request.run.run_id);
        async move {
            let clock = Instant::now();
            METRICS.inc_pipelines_run();
            obs::emit_pipeline_started(
                &request.run.run_id,
                &request.run.source,
                request.trigger.as_event_name(),
            );

            let result = self.execute(&request, execution_id).await;
            let elapsed = clock.elapsed().as_millis() as u64;
            match &result {
                Ok(report) => {
                    obs::emit_pipeline_finished(&request.run.run_id, report.outcome.as_str(), elapsed)
                }
                Err(e) => {
                    error!(error = %e, "pipeline failed; deployment record untouched");
                    obs::emit_pipeline_finished(&request.run.run_id, "failed", elapsed);
                }
            }
            METRICS.flush();
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &PipelineRequest, execution_id: Uuid) -> Result<PipelineReport> {
        let started_at = Utc::now();
        let config = &self.config;
        let timeouts = &config.timeouts;
        let forced = request.is_forced();

        let staging = match &config.staging_parent {
            Some(parent) => StagingArea::new_in(parent)?,
            None => StagingArea::new()?,
        };

        let validated = timed(
            Stage::Validate,
            timeouts.validate(),
            RunValidator::validate(self.services.ci.as_ref(), &request.run, &config.read_retry),
        )
        .await?;

        let incoming = timed(
            Stage::Fetch,
            timeouts.fetch(),
            ArtifactFetcher::fetch(
                self.services.ci.as_ref(),
                &validated,
                &staging.incoming_dir(),
                &config.download_retry(),
            ),
        )
        .await?;

        // Extraction bounds each of its steps and degrades instead of failing.
        let clock = Instant::now();
        let baseline = ContentExtractor::extract(
            &self.services.registry,
            &config.image,
            &config.image_asset_dir,
            &staging.baseline_dir(),
            &config.pull_retry(),
            timeouts.extract_step(),
        )
        .await;
        obs::emit_stage_completed(Stage::Extract, clock.elapsed().as_millis() as u64);

        let clock = Instant::now();
        let merged = MergeEngine::merge_staged(baseline.bundle, incoming, &staging.incoming_dir())?;
        obs::emit_stage_completed(Stage::Merge, clock.elapsed().as_millis() as u64);
        let merge = MergeSummary::from(&merged);

        let build = BuildContext {
            source: config.build_context.clone(),
            asset_dir: config.context_asset_dir.clone(),
        };
        let published = timed(
            Stage::Publish,
            timeouts.publish(),
            ImagePublisher::publish(
                self.services.registry.as_ref(),
                &merged,
                &build,
                &staging.context_dir(),
                &config.image,
            ),
        )
        .await?;
        drop(merged);

        let clock = Instant::now();
        let mut gate = DeploymentGate::new();
        let decision = gate
            .evaluate(self.services.record.as_ref(), &published.identity, forced)
            .await?;
        obs::emit_stage_completed(Stage::Gate, clock.elapsed().as_millis() as u64);

        let clock = Instant::now();
        let payload = dispatch_payload(
            &config.dispatch_event_type,
            &published.image,
            &request.run.run_id,
            &request.trigger,
        );
        let dispatch = DispatchPropagator::new(
            &self.services.notifiers,
            self.services.record.as_ref(),
            timeouts.notify(),
        )
        .propagate(&decision, &published, &payload)
        .await?;
        obs::emit_stage_completed(Stage::Dispatch, clock.elapsed().as_millis() as u64);

        let outcome = match (decision.deploy, dispatch.is_degraded()) {
            (false, _) => PipelineOutcome::Unchanged,
            (true, false) => PipelineOutcome::Deployed,
            (true, true) => PipelineOutcome::DeployedDegraded,
        };
        if outcome == PipelineOutcome::DeployedDegraded {
            info!(
                failed = dispatch.failures.len(),
                "published and recorded; re-trigger the notification for the failed consumers"
            );
        }

        Ok(PipelineReport {
            execution_id,
            run: request.run.clone(),
            trigger: request.trigger.clone(),
            forced,
            started_at,
            finished_at: Utc::now(),
            outcome,
            baseline: baseline.source,
            merge,
            published,
            decision,
            dispatch,
        })
    }

    /// Send the downstream notification for the configured image without
    /// publishing and without touching the deployment record.
    pub async fn renotify(&self, run_id: &str, trigger: &TriggerSource) -> DispatchOutcome {
        let payload = dispatch_payload(
            &self.config.dispatch_event_type,
            &self.config.image,
            run_id,
            trigger,
        );
        DispatchPropagator::new(
            &self.services.notifiers,
            self.services.record.as_ref(),
            self.config.timeouts.notify(),
        )
        .notify_all(&payload)
        .await
    }

    /// Evaluate the gate for `identity` against the stored record with no
    /// side effects.
    pub async fn preview_gate(&self, identity: &ImageIdentity, forced: bool) -> Result<DeployDecision> {
        let recorded = self.services.record.read().await?;
        Ok(evaluate_gate(identity, recorded.as_ref(), forced))
    }
}

/// Bound a stage with its timeout and log its duration on success.
async fn timed<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let clock = Instant::now();
    let value = tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PipelineError::Timeout {
            stage,
            after_ms: limit.as_millis() as u64,
        })??;
    obs::emit_stage_completed(stage, clock.elapsed().as_millis() as u64);
    Ok(value)
}
