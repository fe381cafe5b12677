use std::sync::Arc;
use std::time::Duration;

use assetship_core::fakes::{FakeCiProvider, FakeNotifier, FakeRegistry};
use assetship_core::{
    AssetBundle, AssetPath, BaselineSource, DecisionReason, DeploymentNotifier, PipelineConfig, PipelineError,
    PipelineOutcome, PipelineRequest, PipelineServices, PublishPipeline, RetryPolicy, RunConclusion,
    RunDescriptor, RunState, RunStatus, Stage, StageTimeouts, TriggerSource,
};
use assetship_state::fakes::MemoryRecordStore;
use assetship_state::ImageIdentity;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ARTIFACT: &str = "glb-models";

fn bundle(entries: &[(&str, &[u8])]) -> AssetBundle {
    entries
        .iter()
        .map(|(path, content)| (AssetPath::parse(path).expect("valid path"), content.to_vec()))
        .collect()
}

fn run() -> RunDescriptor {
    RunDescriptor::new("owner/models", "4242", ARTIFACT)
}

fn ci_with(files: AssetBundle) -> FakeCiProvider {
    FakeCiProvider::successful().with_artifact(ARTIFACT, "artifact-1", files)
}

struct Harness {
    ci: Arc<FakeCiProvider>,
    registry: Arc<FakeRegistry>,
    notifier: Arc<FakeNotifier>,
    record: Arc<MemoryRecordStore>,
    staging_parent: TempDir,
    pipeline: PublishPipeline,
}

impl Harness {
    fn new(ci: FakeCiProvider, registry: FakeRegistry, record: MemoryRecordStore) -> Self {
        Self::with_notifier(ci, registry, record, FakeNotifier::new("deploy-hook"))
    }

    fn with_notifier(
        ci: FakeCiProvider,
        registry: FakeRegistry,
        record: MemoryRecordStore,
        notifier: FakeNotifier,
    ) -> Self {
        Self::configured(ci, registry, record, notifier, |config| {
            config.with_read_retry(RetryPolicy {
                attempt_timeout_ms: 1_000,
                max_attempts: 2,
                backoff_base_ms: 1,
            })
        })
    }

    /// `configure` receives the image config with only the staging parent set.
    fn configured(
        ci: FakeCiProvider,
        registry: FakeRegistry,
        record: MemoryRecordStore,
        notifier: FakeNotifier,
        configure: impl FnOnce(PipelineConfig) -> PipelineConfig,
    ) -> Self {
        let ci = Arc::new(ci);
        let registry = Arc::new(registry);
        let notifier = Arc::new(notifier);
        let record = Arc::new(record);
        let staging_parent = tempfile::tempdir().expect("staging parent");

        let config = configure(
            PipelineConfig::new("owner/model-server:latest").with_staging_parent(staging_parent.path()),
        );
        let services = PipelineServices {
            ci: ci.clone(),
            registry: registry.clone(),
            notifiers: vec![notifier.clone() as Arc<dyn DeploymentNotifier>],
            record: record.clone(),
        };

        Self {
            ci,
            registry,
            notifier,
            record,
            staging_parent,
            pipeline: PublishPipeline::new(config, services),
        }
    }

    async fn run(&self, trigger: TriggerSource) -> assetship_core::Result<assetship_core::PipelineReport> {
        self.pipeline.run(PipelineRequest::new(run(), trigger)).await
    }

    fn staging_is_clean(&self) -> bool {
        std::fs::read_dir(self.staging_parent.path())
            .expect("read staging parent")
            .next()
            .is_none()
    }
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_run_publishes_and_records_identity() {
    let incoming = bundle(&[("a/model.glb", b"bytes1")]);
    let h = Harness::new(
        ci_with(incoming.clone()),
        FakeRegistry::new("models"),
        MemoryRecordStore::new(),
    );

    let report = h.run(TriggerSource::Push).await.expect("pipeline");

    assert_eq!(report.baseline, BaselineSource::FirstRun);
    assert_eq!(report.merge.added, vec!["a/model.glb".to_string()]);
    assert!(report.merge.overwritten.is_empty());
    assert_eq!(h.registry.published(), Some(incoming.clone()));
    assert!(report.decision.deploy);
    assert_eq!(report.decision.reason, DecisionReason::FirstDeployment);
    assert_eq!(report.outcome, PipelineOutcome::Deployed);

    let expected = FakeRegistry::identity_of(&incoming);
    assert_eq!(report.published.identity, expected);
    assert_eq!(h.record.snapshot(), Some(expected));

    let payloads = h.notifier.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].event_type, "docker-image-updated");
    assert_eq!(payloads[0].image_reference, "owner/model-server:latest");
    assert_eq!(payloads[0].triggering_run_id, "4242");
    assert_eq!(payloads[0].trigger_source, "push");

    assert!(h.staging_is_clean());
}

#[tokio::test]
async fn incoming_overwrites_baseline_and_keeps_the_rest() {
    let baseline = bundle(&[("a/model.glb", b"bytesOld"), ("b/x.wrl", b"bytesB")]);
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"bytesNew")])),
        FakeRegistry::new("models").with_published(baseline.clone()),
        MemoryRecordStore::with_identity(FakeRegistry::identity_of(&baseline)),
    );

    let report = h.run(TriggerSource::Push).await.expect("pipeline");

    assert_eq!(report.baseline, BaselineSource::Extracted);
    assert_eq!(report.merge.overwritten, vec!["a/model.glb".to_string()]);
    assert!(report.merge.added.is_empty());
    assert_eq!(report.merge.retained, 1);
    assert_eq!(
        h.registry.published(),
        Some(bundle(&[("a/model.glb", b"bytesNew"), ("b/x.wrl", b"bytesB")]))
    );
    assert_eq!(report.decision.reason, DecisionReason::IdentityChanged);
    assert_eq!(h.record.write_count(), 1);

    let counters = h.registry.counters();
    assert_eq!(counters.instances_created, 1);
    assert_eq!(counters.instances_destroyed, 1);
}

// ---------------------------------------------------------------------------
// Gate behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unchanged_identity_on_push_does_not_deploy() {
    let published = bundle(&[("a/model.glb", b"same"), ("b/x.wrl", b"B")]);
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"same")])),
        FakeRegistry::new("models").with_published(published.clone()),
        MemoryRecordStore::with_identity(FakeRegistry::identity_of(&published)),
    );

    let report = h.run(TriggerSource::Push).await.expect("pipeline");

    assert!(!report.decision.deploy);
    assert_eq!(report.outcome, PipelineOutcome::Unchanged);
    assert!(h.notifier.payloads().is_empty());
    assert_eq!(h.record.write_count(), 0);
    assert!(!report.dispatch.recorded);
    // The image is still rebuilt and pushed.
    assert_eq!(h.registry.counters().pushes, 1);
}

#[tokio::test]
async fn repeated_runs_settle_on_no_deploy() {
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"v1")])),
        FakeRegistry::new("models"),
        MemoryRecordStore::new(),
    );

    let first = h.run(TriggerSource::Push).await.expect("first run");
    assert_eq!(first.outcome, PipelineOutcome::Deployed);

    for _ in 0..3 {
        let again = h.run(TriggerSource::Schedule).await.expect("repeat run");
        assert_eq!(again.outcome, PipelineOutcome::Unchanged);
        assert_eq!(again.published.identity, first.published.identity);
    }
    assert_eq!(h.record.write_count(), 1);
    assert_eq!(h.notifier.payloads().len(), 1);
}

#[tokio::test]
async fn upstream_notification_forces_deploy_of_unchanged_identity() {
    let published = bundle(&[("a/model.glb", b"same")]);
    let h = Harness::new(
        ci_with(published.clone()),
        FakeRegistry::new("models").with_published(published.clone()),
        MemoryRecordStore::with_identity(FakeRegistry::identity_of(&published)),
    );

    let report = h
        .run(TriggerSource::from_event_name("repository_dispatch"))
        .await
        .expect("pipeline");

    assert!(report.forced);
    assert!(report.decision.deploy);
    assert_eq!(report.decision.reason, DecisionReason::ForcedTrigger);
    assert_eq!(h.notifier.payloads()[0].trigger_source, "repository_dispatch");
    assert_eq!(h.record.write_count(), 1);
}

#[tokio::test]
async fn force_flag_overrides_ordinary_trigger() {
    let published = bundle(&[("a/model.glb", b"same")]);
    let h = Harness::new(
        ci_with(published.clone()),
        FakeRegistry::new("models").with_published(published.clone()),
        MemoryRecordStore::with_identity(FakeRegistry::identity_of(&published)),
    );

    let report = h
        .pipeline
        .run(PipelineRequest::new(run(), TriggerSource::Manual).with_force(true))
        .await
        .expect("pipeline");

    assert_eq!(report.decision.reason, DecisionReason::ForcedTrigger);
    assert_eq!(report.outcome, PipelineOutcome::Deployed);
}

// ---------------------------------------------------------------------------
// Fatal paths leave the record untouched
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_upstream_run_never_reaches_fetch() {
    for conclusion in [
        RunConclusion::Failure,
        RunConclusion::Cancelled,
        RunConclusion::TimedOut,
        RunConclusion::Skipped,
    ] {
        let ci = FakeCiProvider::with_status(RunStatus::new(RunState::Completed, Some(conclusion)))
            .with_artifact(ARTIFACT, "artifact-1", bundle(&[("a/model.glb", b"x")]));
        let prior = ImageIdentity::try_from("sha256:prior").expect("identity");
        let h = Harness::new(
            ci,
            FakeRegistry::new("models"),
            MemoryRecordStore::with_identity(prior.clone()),
        );

        let err = h.run(TriggerSource::Push).await.unwrap_err();

        assert!(matches!(err, PipelineError::UpstreamNotReady { .. }), "{conclusion}");
        assert_eq!(h.ci.calls().download, 0);
        assert_eq!(h.registry.counters().pulls, 0);
        assert_eq!(h.record.snapshot(), Some(prior));
        assert_eq!(h.record.write_count(), 0);
        assert!(h.staging_is_clean());
    }
}

#[tokio::test]
async fn empty_artifact_fails_before_publish() {
    let h = Harness::new(
        ci_with(AssetBundle::new()),
        FakeRegistry::new("models"),
        MemoryRecordStore::new(),
    );

    let err = h.run(TriggerSource::Push).await.unwrap_err();

    assert!(matches!(err, PipelineError::EmptyArtifact { .. }));
    assert_eq!(h.registry.counters().builds, 0);
    assert_eq!(h.record.snapshot(), None);
    assert!(h.staging_is_clean());
}

#[tokio::test]
async fn missing_artifact_is_fatal() {
    let ci = FakeCiProvider::successful().with_artifact("coverage", "c-1", bundle(&[("x", b"x")]));
    let h = Harness::new(ci, FakeRegistry::new("models"), MemoryRecordStore::new());

    let err = h.run(TriggerSource::Push).await.unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactNotFound { .. }));
    assert_eq!(h.ci.calls().download, 0);
}

#[tokio::test]
async fn build_failure_leaves_record_and_consumers_untouched() {
    let prior = ImageIdentity::try_from("sha256:prior").expect("identity");
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"new")])),
        FakeRegistry::new("models").fail_build(),
        MemoryRecordStore::with_identity(prior.clone()),
    );

    let err = h.run(TriggerSource::UpstreamNotification).await.unwrap_err();

    assert!(matches!(err, PipelineError::BuildFailed(_)));
    assert_eq!(h.registry.counters().pushes, 0);
    assert_eq!(h.record.snapshot(), Some(prior));
    assert_eq!(h.record.read_count(), 0);
    assert!(h.notifier.payloads().is_empty());
    assert!(h.staging_is_clean());
}

#[tokio::test]
async fn exhausted_artifact_downloads_stop_before_extraction() {
    let prior = ImageIdentity::try_from("sha256:prior").expect("identity");
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"new")])).fail_downloads(10),
        FakeRegistry::new("models").with_published(bundle(&[("b/x.wrl", b"wrl")])),
        MemoryRecordStore::with_identity(prior.clone()),
    );

    let err = h.run(TriggerSource::Push).await.unwrap_err();

    assert!(matches!(err, PipelineError::FetchUnavailable { attempts: 2, .. }));
    assert!(err.is_fatal());
    assert_eq!(h.ci.calls().download, 2);
    assert_eq!(h.registry.counters().pulls, 0);
    assert_eq!(h.registry.counters().builds, 0);
    assert_eq!(h.record.snapshot(), Some(prior));
    assert_eq!(h.record.write_count(), 0);
    assert!(h.notifier.payloads().is_empty());
    assert!(h.staging_is_clean());
}

#[tokio::test(start_paused = true)]
async fn publish_timeout_pushes_nothing_and_keeps_record() {
    let baseline = bundle(&[("b/x.wrl", b"wrl")]);
    let prior = FakeRegistry::identity_of(&baseline);
    let h = Harness::configured(
        ci_with(bundle(&[("a/model.glb", b"new")])),
        FakeRegistry::new("models")
            .with_published(baseline.clone())
            .with_build_delay(Duration::from_secs(120)),
        MemoryRecordStore::with_identity(prior.clone()),
        FakeNotifier::new("deploy-hook"),
        |config| {
            config.with_timeouts(StageTimeouts {
                publish_ms: 30_000,
                ..StageTimeouts::default()
            })
        },
    );

    let err = h.run(TriggerSource::UpstreamNotification).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Timeout {
            stage: Stage::Publish,
            after_ms: 30_000
        }
    ));
    assert_eq!(h.registry.counters().builds, 1);
    assert_eq!(h.registry.counters().pushes, 0);
    assert_eq!(h.registry.published(), Some(baseline));
    assert_eq!(h.record.snapshot(), Some(prior));
    assert_eq!(h.record.write_count(), 0);
    assert!(h.notifier.payloads().is_empty());
    assert!(h.staging_is_clean());
}

#[tokio::test]
async fn push_failure_is_never_mistaken_for_unchanged() {
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"new")])),
        FakeRegistry::new("models").fail_push(),
        MemoryRecordStore::new(),
    );

    let err = h.run(TriggerSource::Push).await.unwrap_err();

    assert!(matches!(err, PipelineError::PushFailed(_)));
    assert!(err.is_fatal());
    assert_eq!(h.record.snapshot(), None);
    assert!(h.notifier.payloads().is_empty());
}

// ---------------------------------------------------------------------------
// Degraded but successful
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn slow_baseline_pull_keeps_previously_published_assets() {
    let baseline = bundle(&[("a/model.glb", b"bytesOld"), ("b/x.wrl", b"bytesB")]);
    let h = Harness::configured(
        ci_with(bundle(&[("a/model.glb", b"bytesNew")])),
        FakeRegistry::new("models")
            .with_published(baseline.clone())
            .with_pull_delay(Duration::from_secs(90)),
        MemoryRecordStore::with_identity(FakeRegistry::identity_of(&baseline)),
        FakeNotifier::new("deploy-hook"),
        |config| config,
    );

    let report = h.run(TriggerSource::Push).await.expect("pipeline");

    assert_eq!(report.baseline, BaselineSource::Extracted);
    assert_eq!(h.registry.counters().pulls, 1);
    let published = h.registry.published().expect("published");
    assert_eq!(
        published.get(&AssetPath::parse("b/x.wrl").expect("path")),
        Some(&b"bytesB"[..])
    );
    assert_eq!(
        published.get(&AssetPath::parse("a/model.glb").expect("path")),
        Some(&b"bytesNew"[..])
    );
    assert_eq!(report.decision.reason, DecisionReason::IdentityChanged);
}

#[tokio::test]
async fn extraction_failure_degrades_to_empty_baseline() {
    let baseline = bundle(&[("old/kept.glb", b"old")]);
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"new")])),
        FakeRegistry::new("models").with_published(baseline).fail_copy(),
        MemoryRecordStore::new(),
    );

    let report = h.run(TriggerSource::Push).await.expect("pipeline");

    assert!(matches!(report.baseline, BaselineSource::Degraded(_)));
    assert_eq!(report.merge.total, 1);
    assert_eq!(h.registry.published(), Some(bundle(&[("a/model.glb", b"new")])));
    assert_eq!(h.registry.counters().instances_destroyed, 1);
    assert_eq!(report.outcome, PipelineOutcome::Deployed);
}

#[tokio::test]
async fn notification_failure_still_records_identity() {
    let incoming = bundle(&[("a/model.glb", b"bytes1")]);
    let h = Harness::with_notifier(
        ci_with(incoming.clone()),
        FakeRegistry::new("models"),
        MemoryRecordStore::new(),
        FakeNotifier::new("deploy-hook").failing(),
    );

    let report = h.run(TriggerSource::Push).await.expect("degraded success");

    assert_eq!(report.outcome, PipelineOutcome::DeployedDegraded);
    assert!(report.dispatch.recorded);
    assert_eq!(report.dispatch.failures.len(), 1);
    assert_eq!(report.dispatch.failures[0].consumer, "deploy-hook");
    assert_eq!(h.record.snapshot(), Some(FakeRegistry::identity_of(&incoming)));
}

#[tokio::test]
async fn record_write_failure_is_fatal() {
    let record = MemoryRecordStore::new();
    record.fail_writes();
    let h = Harness::new(
        ci_with(bundle(&[("a/model.glb", b"bytes1")])),
        FakeRegistry::new("models"),
        record,
    );

    let err = h.run(TriggerSource::Push).await.unwrap_err();
    assert!(matches!(err, PipelineError::Storage(_)));
    assert!(h.staging_is_clean());
}

// ---------------------------------------------------------------------------
// Side-channel operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn renotify_does_not_touch_record() {
    let prior = ImageIdentity::try_from("sha256:prior").expect("identity");
    let h = Harness::new(
        FakeCiProvider::successful(),
        FakeRegistry::new("models"),
        MemoryRecordStore::with_identity(prior.clone()),
    );

    let outcome = h.pipeline.renotify("77", &TriggerSource::Manual).await;

    assert_eq!(outcome.notified, vec!["deploy-hook".to_string()]);
    assert!(!outcome.recorded);
    assert_eq!(h.notifier.payloads()[0].triggering_run_id, "77");
    assert_eq!(h.record.snapshot(), Some(prior));
    assert_eq!(h.record.write_count(), 0);
    assert_eq!(h.ci.calls().run_status, 0);
}

#[tokio::test]
async fn preview_gate_has_no_side_effects() {
    let prior = ImageIdentity::try_from("sha256:prior").expect("identity");
    let h = Harness::new(
        FakeCiProvider::successful(),
        FakeRegistry::new("models"),
        MemoryRecordStore::with_identity(prior.clone()),
    );

    let same = h.pipeline.preview_gate(&prior, false).await.expect("gate");
    assert!(!same.deploy);

    let other = ImageIdentity::try_from("sha256:other").expect("identity");
    let changed = h.pipeline.preview_gate(&other, false).await.expect("gate");
    assert_eq!(changed.reason, DecisionReason::IdentityChanged);

    assert_eq!(h.record.write_count(), 0);
    assert!(h.notifier.payloads().is_empty());
}
