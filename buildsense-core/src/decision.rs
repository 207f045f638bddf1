use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::proposal::{AxisScores, DeviceAction, Proposal};
use crate::room::{DeviceId, RoomId};
use crate::slo::SloReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Override,
    Weighted,
    Majority,
    Escalation,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::Weighted => "weighted",
            Self::Majority => "majority",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one device was settled in a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeviceOutcome {
    Resolved {
        action: DeviceAction,
        /// Σ confidence × weight of the agents backing the winning action.
        score: f64,
        /// `score` divided by the summed weights of agents present this round.
        normalized_score: f64,
        method: ResolutionMethod,
        supporters: Vec<AgentId>,
    },
    /// Agents proposed something this round, just nothing for this device.
    Unchanged,
    /// Nobody contributed to the round; flagged for manual review.
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceResolution {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub outcome: DeviceOutcome,
}

impl DeviceResolution {
    pub fn is_escalated(&self) -> bool {
        matches!(self.outcome, DeviceOutcome::Escalated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ExclusionReason {
    Inactive,
    TimedOut,
    /// Proposal arrived from an agent id missing from the roster snapshot.
    Unconfigured,
    InvalidConfig { detail: String },
    Failed { detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludedAgent {
    pub agent_id: AgentId,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

impl ExcludedAgent {
    pub fn new(agent_id: impl Into<AgentId>, reason: ExclusionReason) -> Self {
        Self {
            agent_id: agent_id.into(),
            reason,
        }
    }
}

/// The authoritative outcome of one round for one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub round_id: String,
    pub room_id: RoomId,
    pub decided_at: DateTime<Utc>,
    pub method: ResolutionMethod,
    pub actions: Vec<DeviceAction>,
    pub resolutions: Vec<DeviceResolution>,
    /// Every proposal received, winners and losers alike.
    pub proposals: Vec<Proposal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overridden: Vec<AgentId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ExcludedAgent>,
    pub scores: AxisScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slo_report: Option<SloReport>,
}

impl Decision {
    pub fn escalated_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.resolutions
            .iter()
            .filter(|resolution| resolution.is_escalated())
            .map(|resolution| &resolution.device_id)
    }

    pub fn is_escalation(&self) -> bool {
        self.resolutions.iter().any(DeviceResolution::is_escalated)
    }

    pub fn resolution(&self, device_id: &str) -> Option<&DeviceResolution> {
        self.resolutions
            .iter()
            .find(|resolution| resolution.device_id == device_id)
    }
}

/// States a round passes through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Collecting,
    Resolving,
    Overridden,
    Weighted,
    Escalated,
    Recorded,
}

impl RoundPhase {
    /// Terminal resolution state for a decision resolved with `method`.
    pub fn after_resolution(method: ResolutionMethod) -> Self {
        match method {
            ResolutionMethod::Override => Self::Overridden,
            ResolutionMethod::Weighted | ResolutionMethod::Majority => Self::Weighted,
            ResolutionMethod::Escalation => Self::Escalated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Resolving => "resolving",
            Self::Overridden => "overridden",
            Self::Weighted => "weighted",
            Self::Escalated => "escalated",
            Self::Recorded => "recorded",
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::ActionVerb;

    #[test]
    fn resolution_serializes_flat_with_outcome_tag() {
        let resolution = DeviceResolution {
            device_id: "hvac-1".to_string(),
            outcome: DeviceOutcome::Resolved {
                action: DeviceAction::new("hvac-1", ActionVerb::TurnOff),
                score: 0.54,
                normalized_score: 0.675,
                method: ResolutionMethod::Weighted,
                supporters: vec!["energy".to_string()],
            },
        };

        let encoded = serde_json::to_value(&resolution).expect("serialize");
        assert_eq!(encoded["device_id"], "hvac-1");
        assert_eq!(encoded["outcome"], "resolved");
        assert_eq!(encoded["method"], "weighted");

        let escalated = serde_json::to_value(DeviceResolution {
            device_id: "light-1".to_string(),
            outcome: DeviceOutcome::Escalated,
        })
        .expect("serialize");
        assert_eq!(
            escalated,
            serde_json::json!({"device_id": "light-1", "outcome": "escalated"})
        );
    }

    #[test]
    fn phases_follow_resolution_method() {
        assert_eq!(
            RoundPhase::after_resolution(ResolutionMethod::Majority),
            RoundPhase::Weighted
        );
        assert_eq!(
            RoundPhase::after_resolution(ResolutionMethod::Escalation),
            RoundPhase::Escalated
        );
    }
}
