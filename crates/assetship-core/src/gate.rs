//! DeploymentGate: decide whether a deploy is warranted for a published image.
//!
//! Rule order matters:
//! 1. forced trigger ⇒ deploy
//! 2. no prior record ⇒ deploy (first deployment)
//! 3. identity differs from record ⇒ deploy
//! 4. otherwise ⇒ no deploy
//!
//! Rule 1 comes first because a forced trigger asserts a change the image
//! digest cannot see.

use assetship_state::{DeploymentRecordStore, ImageIdentity};
use serde::Serialize;

use crate::domain::Result;
use crate::metrics::METRICS;
use crate::obs;

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ForcedTrigger,
    FirstDeployment,
    IdentityChanged,
    Unchanged,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ForcedTrigger => "forced_trigger",
            DecisionReason::FirstDeployment => "first_deployment",
            DecisionReason::IdentityChanged => "identity_changed",
            DecisionReason::Unchanged => "unchanged",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeployDecision {
    pub deploy: bool,
    pub reason: DecisionReason,
}

/// The decision procedure over its three inputs.
pub fn decide(forced: bool, has_prior: bool, identity_equal: bool) -> DeployDecision {
    let (deploy, reason) = match (forced, has_prior, identity_equal) {
        (true, _, _) => (true, DecisionReason::ForcedTrigger),
        (false, false, _) => (true, DecisionReason::FirstDeployment),
        (false, true, false) => (true, DecisionReason::IdentityChanged),
        (false, true, true) => (false, DecisionReason::Unchanged),
    };
    DeployDecision { deploy, reason }
}

/// Apply [`decide`] to a concrete identity and record value.
pub fn evaluate_gate(
    current: &ImageIdentity,
    recorded: Option<&ImageIdentity>,
    forced: bool,
) -> DeployDecision {
    decide(forced, recorded.is_some(), recorded == Some(current))
}

/// Gate lifecycle: `Evaluating` until a decision is taken, then `Decided`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Evaluating,
    Decided(DeployDecision),
}

/// Stateful gate bound to one pipeline execution.
#[derive(Debug)]
pub struct DeploymentGate {
    state: GateState,
}

impl Default for DeploymentGate {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Evaluating,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Read the record and decide. Only reads the store; a decided gate
    /// returns its earlier decision without reading again.
    pub async fn evaluate(
        &mut self,
        store: &dyn DeploymentRecordStore,
        current: &ImageIdentity,
        forced: bool,
    ) -> Result<DeployDecision> {
        if let GateState::Decided(decision) = self.state {
            return Ok(decision);
        }

        let recorded = store.read().await?;
        let decision = evaluate_gate(current, recorded.as_ref(), forced);

        obs::emit_gate_decided(current.as_str(), forced, decision.deploy, decision.reason.as_str());
        METRICS.record_decision(decision.deploy);

        self.state = GateState::Decided(decision);
        Ok(decision)
    }
}
