//! Assetship CLI
//!
//! The `assetship` command publishes a CI artifact into the asset image and
//! gates the downstream deploy on the image's content identity.
//!
//! ## Commands
//!
//! - `publish`: run the whole pipeline for one upstream run
//! - `pull`: pull an image with progress and verify it locally
//! - `record show`: print the last deployed image identity
//! - `notify`: re-send the downstream notification without publishing
//! - `gate`: evaluate the deploy decision for an identity, no side effects

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use assetship_adapters::{
    DeployHook, DeployHookConfig, DockerCli, GithubClient, GithubConfig,
    RepositoryDispatchNotifier, DEFAULT_MAX_ENTRY_BYTES,
};
use assetship_core::config::{
    DEFAULT_CONTEXT_ASSET_DIR, DEFAULT_DISPATCH_EVENT, DEFAULT_IMAGE_ASSET_DIR, DEFAULT_RECORD_PATH,
};
use assetship_core::{
    DeploymentNotifier, DeploymentRecordStore, FileRecordStore, ImageIdentity, ImageRef,
    ImageRegistry, PipelineConfig, PipelineOutcome, PipelineReport, PipelineRequest,
    PipelineServices, PublishPipeline, PullOutcome, RetryPolicy, RunDescriptor, StageTimeouts,
    TriggerSource,
};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "assetship")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish CI asset artifacts into a serving image and gate deploys by digest", long_about = None)]
struct Cli {
    /// Enable verbose output (pull progress, stage timings)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Deployment record file
    #[arg(long, global = true, env = "ASSETSHIP_RECORD_PATH", default_value = DEFAULT_RECORD_PATH)]
    record: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Image and dispatch settings shared by commands that publish or notify.
#[derive(Args, Debug, Clone)]
struct ImageArgs {
    /// Published image reference including tag
    #[arg(long, env = "ASSETSHIP_IMAGE")]
    image: String,

    /// Asset directory inside the image
    #[arg(long, env = "ASSETSHIP_IMAGE_ASSET_DIR", default_value = DEFAULT_IMAGE_ASSET_DIR)]
    image_asset_dir: String,

    /// Asset directory relative to the build context
    #[arg(long, env = "ASSETSHIP_CONTEXT_ASSET_DIR", default_value = DEFAULT_CONTEXT_ASSET_DIR)]
    context_asset_dir: String,

    /// Directory holding the image build definition
    #[arg(long, env = "ASSETSHIP_BUILD_CONTEXT")]
    build_context: Option<PathBuf>,

    /// Parent directory for per-run staging
    #[arg(long, env = "ASSETSHIP_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// `event_type` sent to downstream consumers
    #[arg(long, env = "ASSETSHIP_DISPATCH_EVENT", default_value = DEFAULT_DISPATCH_EVENT)]
    dispatch_event: String,

    /// Repository (`owner/name`) that receives a repository_dispatch event
    #[arg(long, env = "ASSETSHIP_DISPATCH_REPO")]
    dispatch_repo: Option<String>,

    #[command(flatten)]
    limits: LimitArgs,
}

/// Retry and timeout overrides. Unset values keep the library defaults.
#[derive(Args, Debug, Clone, Default)]
struct LimitArgs {
    /// Attempts per idempotent read (status, download, pull)
    #[arg(long, env = "ASSETSHIP_READ_ATTEMPTS")]
    read_attempts: Option<u32>,

    /// Per-attempt limit for status and artifact queries (ms)
    #[arg(long, env = "ASSETSHIP_READ_TIMEOUT_MS")]
    read_timeout_ms: Option<u64>,

    /// Base backoff between read attempts (ms)
    #[arg(long, env = "ASSETSHIP_READ_BACKOFF_MS")]
    read_backoff_ms: Option<u64>,

    /// Whole validation stage (ms)
    #[arg(long, env = "ASSETSHIP_VALIDATE_TIMEOUT_MS")]
    validate_timeout_ms: Option<u64>,

    /// Whole fetch stage, retries included (ms)
    #[arg(long, env = "ASSETSHIP_FETCH_TIMEOUT_MS")]
    fetch_timeout_ms: Option<u64>,

    /// Each artifact download attempt (ms)
    #[arg(long, env = "ASSETSHIP_DOWNLOAD_TIMEOUT_MS")]
    download_timeout_ms: Option<u64>,

    /// Each baseline image pull attempt (ms)
    #[arg(long, env = "ASSETSHIP_PULL_TIMEOUT_MS")]
    pull_timeout_ms: Option<u64>,

    /// Instance creation and copy during extraction, each (ms)
    #[arg(long, env = "ASSETSHIP_EXTRACT_STEP_TIMEOUT_MS")]
    extract_step_timeout_ms: Option<u64>,

    /// Context assembly, build, push and inspect together (ms)
    #[arg(long, env = "ASSETSHIP_PUBLISH_TIMEOUT_MS")]
    publish_timeout_ms: Option<u64>,

    /// Each downstream notification (ms)
    #[arg(long, env = "ASSETSHIP_NOTIFY_TIMEOUT_MS")]
    notify_timeout_ms: Option<u64>,

    /// Largest single file accepted from an artifact archive (bytes)
    #[arg(long, env = "ASSETSHIP_MAX_ENTRY_BYTES")]
    max_entry_bytes: Option<u64>,
}

impl LimitArgs {
    fn read_retry(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            attempt_timeout_ms: self.read_timeout_ms.unwrap_or(defaults.attempt_timeout_ms),
            max_attempts: self.read_attempts.unwrap_or(defaults.max_attempts),
            backoff_base_ms: self.read_backoff_ms.unwrap_or(defaults.backoff_base_ms),
        }
    }

    fn timeouts(&self) -> StageTimeouts {
        let defaults = StageTimeouts::default();
        StageTimeouts {
            validate_ms: self.validate_timeout_ms.unwrap_or(defaults.validate_ms),
            fetch_ms: self.fetch_timeout_ms.unwrap_or(defaults.fetch_ms),
            download_ms: self.download_timeout_ms.unwrap_or(defaults.download_ms),
            pull_ms: self.pull_timeout_ms.unwrap_or(defaults.pull_ms),
            extract_step_ms: self.extract_step_timeout_ms.unwrap_or(defaults.extract_step_ms),
            publish_ms: self.publish_timeout_ms.unwrap_or(defaults.publish_ms),
            notify_ms: self.notify_timeout_ms.unwrap_or(defaults.notify_ms),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, fetch, merge, publish, gate and dispatch for one upstream run
    Publish {
        #[command(flatten)]
        image: ImageArgs,

        /// Upstream repository (`owner/name`)
        #[arg(long, env = "ASSETSHIP_SOURCE")]
        source: String,

        /// Upstream workflow run id
        #[arg(long)]
        run_id: String,

        /// Artifact name within the run
        #[arg(long, env = "ASSETSHIP_ARTIFACT")]
        artifact: String,

        /// CI event that triggered this execution
        #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "workflow_dispatch")]
        trigger: String,

        /// Deploy even if the image identity is unchanged
        #[arg(long)]
        force: bool,

        /// Write the execution report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Pull an image, showing layer progress with --verbose
    Pull {
        /// Image reference including tag
        image: String,
    },

    /// Inspect the deployment record
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Re-send the downstream notification without publishing
    Notify {
        #[command(flatten)]
        image: ImageArgs,

        /// Run id reported to consumers
        #[arg(long)]
        run_id: String,

        /// Trigger reported to consumers
        #[arg(long, default_value = "workflow_dispatch")]
        trigger: String,
    },

    /// Evaluate the deploy decision for an identity against the record
    Gate {
        /// Image identity to evaluate (e.g. sha256:...)
        #[arg(long)]
        identity: String,

        /// CI event name used for trigger classification
        #[arg(long, default_value = "push")]
        trigger: String,

        /// Treat the trigger as forced
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum RecordAction {
    /// Print the last deployed image identity
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    assetship_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Publish {
            image,
            source,
            run_id,
            artifact,
            trigger,
            force,
            report,
        } => {
            let run = RunDescriptor::new(source, run_id, artifact);
            cmd_publish(&cli.record, &image, run, &trigger, force, report).await
        }
        Commands::Pull { image } => cmd_pull(&image).await,
        Commands::Record { action } => match action {
            RecordAction::Show => cmd_record_show(&cli.record).await,
        },
        Commands::Notify {
            image,
            run_id,
            trigger,
        } => cmd_notify(&cli.record, &image, &run_id, &trigger).await,
        Commands::Gate {
            identity,
            trigger,
            force,
        } => cmd_gate(&cli.record, &identity, &trigger, force).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn pipeline_config(record: &Path, args: &ImageArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::new(&args.image)
        .with_image_asset_dir(&args.image_asset_dir)
        .with_context_asset_dir(&args.context_asset_dir)
        .context("Invalid context asset directory")?
        .with_record_path(record)
        .with_dispatch_event_type(&args.dispatch_event)
        .with_read_retry(args.limits.read_retry())
        .with_timeouts(args.limits.timeouts());
    if let Some(dir) = &args.build_context {
        config = config.with_build_context(dir);
    }
    if let Some(dir) = &args.staging_dir {
        config = config.with_staging_parent(dir);
    }
    Ok(config)
}

/// Deploy hook when `DEPLOY_SERVICE_ID`/`DEPLOY_HOOK_KEY` are set, plus a
/// repository_dispatch notifier when a dispatch repository is given.
fn notifiers(github: &GithubClient, args: &ImageArgs) -> Result<Vec<Arc<dyn DeploymentNotifier>>> {
    let mut notifiers: Vec<Arc<dyn DeploymentNotifier>> = Vec::new();
    match DeployHookConfig::from_env() {
        Ok(config) => {
            let hook = DeployHook::new(config).context("Failed to create deploy hook client")?;
            notifiers.push(Arc::new(hook));
        }
        Err(reason) => info!(%reason, "deploy hook not configured"),
    }
    if let Some(repo) = &args.dispatch_repo {
        notifiers.push(Arc::new(RepositoryDispatchNotifier::new(github.clone(), repo)));
    }
    if notifiers.is_empty() {
        warn!("no downstream consumers configured; deploy decisions will only be recorded");
    }
    Ok(notifiers)
}

fn build_pipeline(record: &Path, args: &ImageArgs) -> Result<PublishPipeline> {
    let config = pipeline_config(record, args)?;
    let github_config = GithubConfig::from_env()
        .with_max_entry_bytes(args.limits.max_entry_bytes.unwrap_or(DEFAULT_MAX_ENTRY_BYTES));
    let github = GithubClient::new(github_config).context("Failed to create GitHub client")?;
    let services = PipelineServices {
        ci: Arc::new(github.clone()),
        registry: Arc::new(DockerCli::from_env()),
        notifiers: notifiers(&github, args)?,
        record: Arc::new(FileRecordStore::new(&config.record_path)),
    };
    Ok(PublishPipeline::new(config, services))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_publish(
    record: &Path,
    args: &ImageArgs,
    run: RunDescriptor,
    trigger: &str,
    force: bool,
    report_path: Option<PathBuf>,
) -> Result<()> {
    let pipeline = build_pipeline(record, args)?;
    let request = PipelineRequest::new(run, TriggerSource::from_event_name(trigger)).with_force(force);

    let report = pipeline
        .run(request)
        .await
        .context("Publish pipeline failed; deployment record left unchanged")?;

    print_report(&report);
    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!("Execution:   {}", report.execution_id);
    println!("Run:         {}", report.run);
    println!("Trigger:     {}{}", report.trigger, if report.forced { " (forced)" } else { "" });
    println!(
        "Merge:       {} files ({} overwritten, {} added, {} retained)",
        report.merge.total,
        report.merge.overwritten.len(),
        report.merge.added.len(),
        report.merge.retained
    );
    println!("Image:       {}", report.published.image);
    println!("Identity:    {}", report.published.identity);
    println!(
        "Decision:    {} ({})",
        if report.decision.deploy { "deploy" } else { "skip" },
        report.decision.reason
    );
    for consumer in &report.dispatch.notified {
        println!("Notified:    {consumer}");
    }
    for failure in &report.dispatch.failures {
        println!("NOT notified: {} ({})", failure.consumer, failure.reason);
    }
    match report.outcome {
        PipelineOutcome::Deployed => println!("Outcome:     deployed"),
        PipelineOutcome::Unchanged => println!("Outcome:     unchanged, nothing dispatched"),
        PipelineOutcome::DeployedDegraded => {
            println!("Outcome:     deployed and recorded, but some consumers were not informed");
            println!("             re-send with: assetship notify --run-id {}", report.run.run_id);
        }
    }
}

async fn cmd_pull(image: &str) -> Result<()> {
    let docker = DockerCli::from_env();
    if !docker.is_available().await {
        bail!("docker is not installed or not in PATH");
    }
    let image = ImageRef::new(image);
    match docker
        .pull(&image)
        .await
        .with_context(|| format!("Failed to pull {image}"))?
    {
        PullOutcome::Pulled => {
            println!("Successfully pulled {image}");
            Ok(())
        }
        PullOutcome::NotFound => bail!("{image} does not exist in the registry"),
    }
}

async fn cmd_record_show(record: &Path) -> Result<()> {
    let store = FileRecordStore::new(record);
    let value = store
        .read()
        .await
        .with_context(|| format!("Failed to read deployment record {}", record.display()))?;
    match value {
        Some(identity) => println!("{identity}"),
        None => println!("none"),
    }
    Ok(())
}

async fn cmd_notify(record: &Path, args: &ImageArgs, run_id: &str, trigger: &str) -> Result<()> {
    let pipeline = build_pipeline(record, args)?;
    let outcome = pipeline
        .renotify(run_id, &TriggerSource::from_event_name(trigger))
        .await;

    for consumer in &outcome.notified {
        println!("Notified: {consumer}");
    }
    if outcome.is_degraded() {
        for failure in &outcome.failures {
            eprintln!("Failed:   {} ({})", failure.consumer, failure.reason);
        }
        bail!("{} consumer(s) were not notified", outcome.failures.len());
    }
    Ok(())
}

async fn cmd_gate(record: &Path, identity: &str, trigger: &str, force: bool) -> Result<()> {
    let identity = ImageIdentity::try_from(identity).context("Invalid image identity")?;
    let forced = force || TriggerSource::from_event_name(trigger).is_forced();

    let store = FileRecordStore::new(record);
    let recorded = store
        .read()
        .await
        .with_context(|| format!("Failed to read deployment record {}", record.display()))?;
    let decision = assetship_core::evaluate_gate(&identity, recorded.as_ref(), forced);

    println!(
        "Recorded: {}",
        recorded.as_ref().map(|r| r.to_string()).unwrap_or_else(|| "none".to_string())
    );
    println!("Forced:   {}", if forced { "yes" } else { "no" });
    println!(
        "Decision: {} ({})",
        if decision.deploy { "deploy" } else { "skip" },
        decision.reason
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn publish_arguments_parse() {
        let cli = Cli::try_parse_from([
            "assetship",
            "publish",
            "--image",
            "owner/server:latest",
            "--source",
            "owner/models",
            "--run-id",
            "42",
            "--artifact",
            "glb-models",
            "--trigger",
            "repository_dispatch",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish {
                image,
                run_id,
                trigger,
                force,
                ..
            } => {
                assert_eq!(image.image, "owner/server:latest");
                assert_eq!(image.context_asset_dir, "models");
                assert_eq!(run_id, "42");
                assert_eq!(trigger, "repository_dispatch");
                assert!(!force);
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn config_from_arguments() {
        let args = ImageArgs {
            image: "owner/server:latest".to_string(),
            image_asset_dir: "/srv/models".to_string(),
            context_asset_dir: "public/models".to_string(),
            build_context: Some(PathBuf::from("docker")),
            staging_dir: None,
            dispatch_event: "docker-image-updated".to_string(),
            dispatch_repo: None,
            limits: LimitArgs::default(),
        };
        let config = pipeline_config(Path::new("state/digest"), &args).unwrap();
        assert_eq!(config.context_asset_dir.as_str(), "public/models");
        assert_eq!(config.record_path, PathBuf::from("state/digest"));
        assert_eq!(config.build_context, Some(PathBuf::from("docker")));
        assert_eq!(config.read_retry, RetryPolicy::default());
        assert_eq!(config.timeouts, StageTimeouts::default());
    }

    #[test]
    fn limit_flags_reach_the_pipeline_config() {
        let cli = Cli::try_parse_from([
            "assetship",
            "publish",
            "--image",
            "owner/server:latest",
            "--source",
            "owner/models",
            "--run-id",
            "42",
            "--artifact",
            "glb-models",
            "--read-attempts",
            "5",
            "--pull-timeout-ms",
            "3600000",
            "--publish-timeout-ms",
            "900000",
        ])
        .unwrap();
        let Commands::Publish { image, .. } = cli.command else {
            panic!("expected publish");
        };

        let config = pipeline_config(Path::new("digest"), &image).unwrap();

        assert_eq!(config.read_retry.max_attempts, 5);
        assert_eq!(config.read_retry.attempt_timeout_ms, RetryPolicy::default().attempt_timeout_ms);
        assert_eq!(config.timeouts.pull_ms, 3_600_000);
        assert_eq!(config.timeouts.publish_ms, 900_000);
        assert_eq!(config.pull_retry().attempt_timeout_ms, 3_600_000);
        assert_eq!(config.timeouts.notify_ms, StageTimeouts::default().notify_ms);
    }

    #[tokio::test]
    async fn record_show_handles_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        cmd_record_show(&dir.path().join("absent")).await.unwrap();
    }
}
