use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentKind, PriorityClass};
use crate::room::DeviceId;

/// Emergency level at or above which an emergency proposal asks to override
/// every other agent.
pub const OVERRIDE_EMERGENCY_LEVEL: u8 = 3;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionVerb {
    TurnOn,
    TurnOff,
    Dim,
    SetTemperature,
    IncreaseVentilation,
    EmergencyVentilation,
    Dehumidify,
    Humidify,
    Maintain,
}

impl ActionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
            Self::Dim => "dim",
            Self::SetTemperature => "set_temperature",
            Self::IncreaseVentilation => "increase_ventilation",
            Self::EmergencyVentilation => "emergency_ventilation",
            Self::Dehumidify => "dehumidify",
            Self::Humidify => "humidify",
            Self::Maintain => "maintain",
        }
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One command for one device.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeviceAction {
    pub device_id: DeviceId,
    pub verb: ActionVerb,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl DeviceAction {
    pub fn new(device_id: impl Into<DeviceId>, verb: ActionVerb) -> Self {
        Self {
            device_id: device_id.into(),
            verb,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// Per-axis scores, each in [0,1].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AxisScores {
    pub comfort: f64,
    pub energy: f64,
    pub reliability: f64,
    pub security: f64,
}

impl AxisScores {
    pub const fn new(comfort: f64, energy: f64, reliability: f64, security: f64) -> Self {
        Self {
            comfort,
            energy,
            reliability,
            security,
        }
    }

    pub fn axes(&self) -> [(&'static str, f64); 4] {
        [
            ("comfort", self.comfort),
            ("energy", self.energy),
            ("reliability", self.reliability),
            ("security", self.security),
        ]
    }

    /// Name of the first axis outside [0,1], if any.
    pub fn out_of_range(&self) -> Option<&'static str> {
        self.axes()
            .into_iter()
            .find(|(_, value)| !is_unit_interval(*value))
            .map(|(name, _)| name)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.comfort * factor,
            self.energy * factor,
            self.reliability * factor,
            self.security * factor,
        )
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            self.comfort + other.comfort,
            self.energy + other.energy,
            self.reliability + other.reliability,
            self.security + other.security,
        )
    }
}

pub fn is_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalSource {
    ModelBacked,
    Fallback,
}

/// Why an agent used its rule set instead of the reasoning provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FallbackReason {
    BudgetDenied,
    NotConfigured,
    ProviderFailure { reason: String },
}

/// One agent's suggestion for one round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub agent_id: AgentId,
    pub kind: AgentKind,
    pub priority: PriorityClass,
    pub actions: Vec<DeviceAction>,
    pub scores: AxisScores,
    pub reasoning: String,
    pub confidence: f64,
    pub source: ProposalSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(default)]
    pub emergency_level: u8,
    #[serde(default)]
    pub override_requested: bool,
}
