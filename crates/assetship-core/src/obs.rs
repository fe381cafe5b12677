//! Structured observability hooks for the pipeline lifecycle.
//!
//! Every emission carries a stable `event = "..."` key so log collectors can
//! filter on it regardless of message wording.

use tracing::{info, warn};

use crate::domain::Stage;

/// Span tagged with the execution and upstream run ids. Attach it to the
/// pipeline future with `tracing::Instrument` so every stage event carries
/// both ids.
pub fn pipeline_span(execution_id: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("assetship.pipeline", execution_id = %execution_id, run_id = %run_id)
}

pub fn emit_pipeline_started(run_id: &str, source: &str, trigger: &str) {
    info!(event = "pipeline.started", run_id = %run_id, source = %source, trigger = %trigger);
}

pub fn emit_stage_completed(stage: Stage, duration_ms: u64) {
    info!(event = "stage.completed", stage = %stage, duration_ms = duration_ms);
}

pub fn emit_merge_completed(total: usize, overwritten: usize, added: usize, retained: usize) {
    info!(
        event = "merge.completed",
        total = total,
        overwritten = overwritten,
        added = added,
        retained = retained,
    );
}

pub fn emit_gate_decided(identity: &str, forced: bool, deploy: bool, reason: &str) {
    info!(
        event = "gate.decided",
        identity = %identity,
        forced = forced,
        deploy = deploy,
        reason = %reason,
    );
}

/// Baseline extraction degraded to an empty tree (warning level).
pub fn emit_extraction_degraded(image: &str, error: &dyn std::fmt::Display) {
    warn!(event = "extraction.degraded", image = %image, error = %error);
}

/// A downstream consumer was not informed (warning level).
pub fn emit_dispatch_failed(consumer: &str, error: &dyn std::fmt::Display) {
    warn!(event = "dispatch.failed", consumer = %consumer, error = %error);
}

pub fn emit_pipeline_finished(run_id: &str, outcome: &str, duration_ms: u64) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}
