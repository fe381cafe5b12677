//! DispatchPropagator: act on a positive deploy decision.
//!
//! Two independent effects: every downstream consumer is notified, and the
//! new identity is persisted. Persistence happens even when notifications
//! fail, since the identity records what was published. A failed
//! notification is reported, never retried, and never fatal.

use std::sync::Arc;
use std::time::Duration;

use assetship_state::DeploymentRecordStore;
use serde::Serialize;
use tracing::{error, info};

use crate::domain::{PipelineError, Result, TriggerSource};
use crate::gate::DeployDecision;
use crate::metrics::METRICS;
use crate::obs;
use crate::publisher::PublishedImage;
use crate::services::{DeploymentNotifier, DispatchPayload, ImageRef};

/// A consumer that was not informed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationFailure {
    pub consumer: String,
    pub reason: String,
}

impl From<NotificationFailure> for PipelineError {
    fn from(failure: NotificationFailure) -> Self {
        PipelineError::DeployNotificationFailed {
            consumer: failure.consumer,
            reason: failure.reason,
        }
    }
}

/// What dispatch actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    /// Consumers that accepted the notification.
    pub notified: Vec<String>,
    pub failures: Vec<NotificationFailure>,
    /// Whether the identity was written to the deployment record.
    pub recorded: bool,
}

impl DispatchOutcome {
    /// Published and recorded, but at least one consumer was not informed.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Build the provenance payload sent to every consumer.
pub fn dispatch_payload(
    event_type: &str,
    image: &ImageRef,
    run_id: &str,
    trigger: &TriggerSource,
) -> DispatchPayload {
    DispatchPayload {
        event_type: event_type.to_string(),
        image_reference: image.to_string(),
        triggering_run_id: run_id.to_string(),
        trigger_source: trigger.as_event_name().to_string(),
    }
}

pub struct DispatchPropagator<'a> {
    notifiers: &'a [Arc<dyn DeploymentNotifier>],
    store: &'a dyn DeploymentRecordStore,
    notify_timeout: Duration,
}

impl<'a> DispatchPropagator<'a> {
    pub fn new(
        notifiers: &'a [Arc<dyn DeploymentNotifier>],
        store: &'a dyn DeploymentRecordStore,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            notifiers,
            store,
            notify_timeout,
        }
    }

    /// Notify and persist when `decision.deploy`; otherwise do nothing.
    ///
    /// Returns `Err` only when the record write fails.
    pub async fn propagate(
        &self,
        decision: &DeployDecision,
        published: &PublishedImage,
        payload: &DispatchPayload,
    ) -> Result<DispatchOutcome> {
        if !decision.deploy {
            return Ok(DispatchOutcome::default());
        }

        let mut outcome = self.notify_all(payload).await;

        if let Err(e) = self.store.write(&published.identity).await {
            error!(
                identity = %published.identity,
                notified = ?outcome.notified,
                error = %e,
                "deployment record not updated; consumers may already have been notified"
            );
            return Err(e.into());
        }
        outcome.recorded = true;
        info!(identity = %published.identity.short(), "deployment record updated");
        Ok(outcome)
    }

    /// Notify every consumer once, collecting failures. Never touches the
    /// deployment record.
    pub async fn notify_all(&self, payload: &DispatchPayload) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for notifier in self.notifiers {
            let consumer = notifier.name().to_string();
            let reason = match tokio::time::timeout(self.notify_timeout, notifier.notify(payload)).await
            {
                Ok(Ok(())) => {
                    info!(consumer = %consumer, image = %payload.image_reference, "consumer notified");
                    outcome.notified.push(consumer);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}ms", self.notify_timeout.as_millis()),
            };
            obs::emit_dispatch_failed(&consumer, &reason);
            METRICS.inc_notification_failures();
            outcome.failures.push(NotificationFailure { consumer, reason });
        }
        outcome
    }
}
