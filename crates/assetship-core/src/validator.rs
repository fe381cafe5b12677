//! RunValidator: trust nothing from an upstream run until it completed
//! successfully and carries the named artifact.

use tracing::{debug, info};

use crate::domain::{PipelineError, Result, RunDescriptor, ValidatedRun};
use crate::retry::{retry_read, RetryPolicy};
use crate::services::CiProvider;

/// Validates a run and resolves its artifact id.
pub struct RunValidator;

impl RunValidator {
    /// Check run status, then resolve `run.artifact_name` to an artifact id.
    ///
    /// Fails with `UpstreamNotReady` unless the run is completed with
    /// conclusion success, and with `ArtifactNotFound` (listing every
    /// available name) if the artifact is missing.
    pub async fn validate(
        ci: &dyn CiProvider,
        run: &RunDescriptor,
        retry: &RetryPolicy,
    ) -> Result<ValidatedRun> {
        let status = retry_read(retry, "run status query", || ci.run_status(run)).await?;
        debug!(state = %status.state, conclusion = ?status.conclusion, "run status fetched");

        if !status.is_successful() {
            return Err(PipelineError::UpstreamNotReady {
                run_id: run.run_id.clone(),
                status: status.state,
                conclusion: status.conclusion,
            });
        }

        let artifacts = retry_read(retry, "artifact listing", || ci.list_artifacts(run)).await?;
        let artifact = match artifacts.iter().find(|a| a.name == run.artifact_name) {
            Some(a) => a.clone(),
            None => {
                let mut available: Vec<String> =
                    artifacts.into_iter().map(|a| a.name).collect();
                available.sort();
                return Err(PipelineError::ArtifactNotFound {
                    name: run.artifact_name.clone(),
                    run_id: run.run_id.clone(),
                    available,
                });
            }
        };

        info!(
            artifact = %artifact.name,
            artifact_id = %artifact.id,
            size_bytes = artifact.size_bytes,
            commit = status.commit.as_deref().unwrap_or("unknown"),
            "upstream run validated"
        );
        Ok(ValidatedRun::new(run.clone(), status, artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunConclusion, RunState, RunStatus};
    use crate::fakes::FakeCiProvider;

    fn run() -> RunDescriptor {
        RunDescriptor::new("owner/models", "101", "glb-models")
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 1_000,
            max_attempts: 2,
            backoff_base_ms: 1,
        }
    }

    #[tokio::test]
    async fn successful_run_resolves_artifact() {
        let ci = FakeCiProvider::successful().with_artifact("glb-models", "a-9", Default::default());
        let validated = RunValidator::validate(&ci, &run(), &policy()).await.unwrap();
        assert_eq!(validated.artifact().id, "a-9");
        assert_eq!(validated.descriptor().run_id, "101");
    }

    #[tokio::test]
    async fn failed_run_is_not_ready_and_skips_listing() {
        let ci = FakeCiProvider::with_status(RunStatus::new(
            RunState::Completed,
            Some(RunConclusion::Failure),
        ));
        let err = RunValidator::validate(&ci, &run(), &policy()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UpstreamNotReady { .. }));
        assert_eq!(ci.calls().list_artifacts, 0);
    }

    #[tokio::test]
    async fn in_progress_run_is_not_ready() {
        let ci = FakeCiProvider::with_status(RunStatus::new(RunState::InProgress, None));
        let err = RunValidator::validate(&ci, &run(), &policy()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UpstreamNotReady {
                status: RunState::InProgress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_artifact_lists_available_names() {
        let ci = FakeCiProvider::successful()
            .with_artifact("wheels", "a-1", Default::default())
            .with_artifact("coverage", "a-2", Default::default());
        let err = RunValidator::validate(&ci, &run(), &policy()).await.unwrap_err();
        match err {
            PipelineError::ArtifactNotFound { available, .. } => {
                assert_eq!(available, vec!["coverage".to_string(), "wheels".to_string()]);
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_fetch_unavailable() {
        let ci = FakeCiProvider::successful().fail_status_queries(10);
        let err = RunValidator::validate(&ci, &run(), &policy()).await.unwrap_err();
        assert!(matches!(err, PipelineError::FetchUnavailable { attempts: 2, .. }));
        assert_eq!(ci.calls().run_status, 2);
    }
}
