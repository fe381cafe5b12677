//! Trigger source classification.

use serde::{Deserialize, Serialize};

/// What started this pipeline execution.
///
/// A *forced* trigger asserts that content changed even if the image digest
/// cannot show it, so the deployment gate must not suppress it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Explicit notification from the upstream producer (`repository_dispatch`).
    UpstreamNotification,
    /// Operator-initiated run (`workflow_dispatch`).
    Manual,
    Push,
    Schedule,
    Other(String),
}

impl TriggerSource {
    /// Classify a CI event name.
    pub fn from_event_name(event: &str) -> Self {
        match event.trim() {
            "repository_dispatch" | "upstream" => TriggerSource::UpstreamNotification,
            "workflow_dispatch" | "manual" => TriggerSource::Manual,
            "push" => TriggerSource::Push,
            "schedule" => TriggerSource::Schedule,
            other => TriggerSource::Other(other.to_string()),
        }
    }

    /// Whether this source bypasses digest comparison.
    pub fn is_forced(&self) -> bool {
        matches!(self, TriggerSource::UpstreamNotification)
    }

    /// Event name as reported in dispatch payloads.
    pub fn as_event_name(&self) -> &str {
        match self {
            TriggerSource::UpstreamNotification => "repository_dispatch",
            TriggerSource::Manual => "workflow_dispatch",
            TriggerSource::Push => "push",
            TriggerSource::Schedule => "schedule",
            TriggerSource::Other(name) => name,
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_event_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_upstream_notification_is_forced() {
        assert!(TriggerSource::from_event_name("repository_dispatch").is_forced());
        assert!(!TriggerSource::from_event_name("push").is_forced());
        assert!(!TriggerSource::from_event_name("workflow_dispatch").is_forced());
        assert!(!TriggerSource::from_event_name("schedule").is_forced());
        assert!(!TriggerSource::from_event_name("pull_request").is_forced());
    }

    #[test]
    fn test_event_name_round_trip() {
        for name in ["repository_dispatch", "workflow_dispatch", "push", "schedule", "release"] {
            assert_eq!(TriggerSource::from_event_name(name).as_event_name(), name);
        }
    }
}
