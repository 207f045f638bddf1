use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type AgentId = String;

/// Higher wins tie-breaks.
pub type PriorityClass = u8;

/// The six objectives an agent can argue for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Security,
    Emergency,
    Comfort,
    Energy,
    Environmental,
    Occupancy,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Emergency,
        AgentKind::Security,
        AgentKind::Environmental,
        AgentKind::Comfort,
        AgentKind::Occupancy,
        AgentKind::Energy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Emergency => "emergency",
            Self::Comfort => "comfort",
            Self::Energy => "energy",
            Self::Environmental => "environmental",
            Self::Occupancy => "occupancy",
        }
    }

    /// Safety-first ordering: emergency > security > environmental > comfort
    /// > occupancy > energy.
    pub fn default_priority(&self) -> PriorityClass {
        match self {
            Self::Emergency => 6,
            Self::Security => 5,
            Self::Environmental => 4,
            Self::Comfort => 3,
            Self::Occupancy => 2,
            Self::Energy => 1,
        }
    }

    pub fn default_weight(&self) -> f64 {
        match self {
            Self::Emergency => 1.0,
            Self::Security => 0.9,
            Self::Comfort | Self::Occupancy => 0.7,
            Self::Energy | Self::Environmental => 0.6,
        }
    }

    pub fn default_objective(&self) -> &'static str {
        match self {
            Self::Security => {
                "Keep the room under surveillance: adequate lighting and powered security devices, \
                 especially when nobody is present."
            }
            Self::Emergency => {
                "Protect occupants. Detect fire, gas, smoke or dangerous air and drive every device \
                 towards life safety, ignoring energy cost."
            }
            Self::Comfort => {
                "Keep temperature, humidity and air circulation inside the comfort band defined by \
                 the room's SLOs while it is occupied."
            }
            Self::Energy => {
                "Minimise energy use: switch off devices that serve nobody while keeping the \
                 minimum needed for safety and security."
            }
            Self::Environmental => {
                "Keep air quality healthy: ventilate when CO2 exceeds its SLO threshold and hold \
                 humidity inside its band."
            }
            Self::Occupancy => {
                "Match the room to how it is used: pre-condition empty rooms before an upcoming \
                 booking and scale services to head count."
            }
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative settings for one agent. Read-only during a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub id: AgentId,
    pub kind: AgentKind,
    pub priority: PriorityClass,
    pub weight: f64,
    pub active: bool,
    pub objective: String,
}

impl AgentConfig {
    /// Config for `kind` with its built-in priority, weight and objective.
    pub fn for_kind(kind: AgentKind) -> Self {
        Self {
            id: kind.as_str().to_string(),
            kind,
            priority: kind.default_priority(),
            weight: kind.default_weight(),
            active: true,
            objective: kind.default_objective().to_string(),
        }
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::InvalidAgent {
                agent_id: self.id.clone(),
                reason: "empty agent id".to_string(),
            });
        }
        if !self.weight.is_finite() || !(0.0..=1.0).contains(&self.weight) {
            return Err(ConfigError::InvalidAgent {
                agent_id: self.id.clone(),
                reason: format!("weight {} outside [0,1]", self.weight),
            });
        }
        Ok(())
    }
}

/// The six built-in agents with their default settings.
pub fn default_agent_configs() -> Vec<AgentConfig> {
    AgentKind::ALL.into_iter().map(AgentConfig::for_kind).collect()
}

/// Validated, id-sorted agent configs captured at the start of a round.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RosterSnapshot {
    configs: Vec<AgentConfig>,
    /// Entries refused at validation time, with the reason.
    rejected: Vec<(AgentId, String)>,
}

impl RosterSnapshot {
    /// Validate `configs` once. Invalid entries and duplicate ids (after the
    /// first occurrence) are rejected instead of failing the round.
    pub fn capture(configs: &[AgentConfig]) -> Self {
        let mut seen = BTreeSet::new();
        let mut accepted = Vec::with_capacity(configs.len());
        let mut rejected = Vec::new();

        for config in configs {
            if let Err(err) = config.validate() {
                tracing::warn!(agent_id = %config.id, error = %err, "agent_config_rejected");
                rejected.push((config.id.clone(), err.to_string()));
                continue;
            }
            if !seen.insert(config.id.clone()) {
                tracing::warn!(agent_id = %config.id, "agent_config_duplicate");
                rejected.push((config.id.clone(), "duplicate agent id".to_string()));
                continue;
            }
            accepted.push(config.clone());
        }

        accepted.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            configs: accepted,
            rejected,
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.configs
            .binary_search_by(|config| config.id.as_str().cmp(agent_id))
            .ok()
            .map(|idx| &self.configs[idx])
    }

    pub fn configs(&self) -> &[AgentConfig] {
        &self.configs
    }

    pub fn active(&self) -> impl Iterator<Item = &AgentConfig> {
        self.configs.iter().filter(|config| config.active)
    }

    pub fn inactive(&self) -> impl Iterator<Item = &AgentConfig> {
        self.configs.iter().filter(|config| !config.active)
    }

    pub fn rejected(&self) -> &[(AgentId, String)] {
        &self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_safety_first_order() {
        let configs = default_agent_configs();
        let priorities: Vec<_> = configs.iter().map(|c| c.priority).collect();
        assert_eq!(priorities, vec![6, 5, 4, 3, 2, 1]);
        assert!(configs.iter().all(|c| c.active));
        assert_eq!(AgentConfig::for_kind(AgentKind::Security).weight, 0.9);
    }

    #[test]
    fn capture_rejects_invalid_and_duplicate_entries() {
        let configs = vec![
            AgentConfig::for_kind(AgentKind::Comfort),
            AgentConfig::for_kind(AgentKind::Energy).with_weight(1.5),
            AgentConfig::for_kind(AgentKind::Comfort).with_weight(0.1),
            AgentConfig::for_kind(AgentKind::Security).inactive(),
        ];

        let roster = RosterSnapshot::capture(&configs);

        let ids: Vec<_> = roster.configs().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["comfort", "security"]);
        assert_eq!(roster.get("comfort").map(|c| c.weight), Some(0.7));
        assert_eq!(roster.active().count(), 1);
        assert_eq!(roster.inactive().count(), 1);
        assert_eq!(roster.rejected().len(), 2);
        assert!(roster.get("energy").is_none());
    }

    #[test]
    fn agent_kind_serializes_snake_case() {
        let encoded = serde_json::to_string(&AgentKind::Environmental).expect("serialize");
        assert_eq!(encoded, "\"environmental\"");
    }
}
