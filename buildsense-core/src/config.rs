use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{default_agent_configs, AgentConfig, AgentKind, PriorityClass};
use crate::error::ConfigError;

/// Replaces `budget.requests_per_window` when set.
pub const ENV_MAX_REQUESTS_PER_MINUTE: &str = "LLM_MAX_REQUESTS_PER_MINUTE";

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildsenseConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub round: RoundConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    /// Absent table means the six built-in agents.
    #[serde(default)]
    pub agents: Option<BTreeMap<String, AgentTomlConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    pub instance_id: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window", with = "humantime_duration")]
    pub window: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            requests_per_window: default_requests_per_window(),
            window: default_window(),
        }
    }
}

fn default_requests_per_window() -> u32 {
    9
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundConfig {
    #[serde(default = "default_deadline", with = "humantime_duration")]
    pub deadline: Duration,
    #[serde(default = "default_call_timeout", with = "humantime_duration")]
    pub call_timeout: Duration,
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f64,
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
    #[serde(default = "default_sensor_max_age", with = "humantime_duration")]
    pub sensor_max_age: Duration,
    /// Bound on each of dispatch and recording once a decision is made.
    #[serde(default = "default_delivery_timeout", with = "humantime_duration")]
    pub delivery_timeout: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            deadline: default_deadline(),
            call_timeout: default_call_timeout(),
            fallback_confidence: default_fallback_confidence(),
            tie_epsilon: default_tie_epsilon(),
            sensor_max_age: default_sensor_max_age(),
            delivery_timeout: default_delivery_timeout(),
        }
    }
}

fn default_deadline() -> Duration {
    Duration::from_secs(8)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_fallback_confidence() -> f64 {
    0.5
}

fn default_tie_epsilon() -> f64 {
    1e-6
}

fn default_sensor_max_age() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// `"none"` disables model-backed reasoning entirely.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".into()
}

fn default_model() -> String {
    "gemini-2.0-flash".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval", with = "humantime_duration")]
    pub interval: Duration,
    /// JSON array of room snapshots, re-read every pass.
    #[serde(default)]
    pub snapshots_path: Option<String>,
    /// JSONL decision log. Defaults to `<data_dir>/decisions.jsonl`.
    #[serde(default)]
    pub decisions_path: Option<String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_interval(),
            snapshots_path: None,
            decisions_path: None,
        }
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OtelConfig {
    pub service_name: Option<String>,
    pub otlp_endpoint: Option<String>,
}

/// Per-agent section from TOML (`[agents.<id>]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentTomlConfig {
    pub kind: AgentKind,
    #[serde(default)]
    pub priority: Option<PriorityClass>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub objective: Option<String>,
}

impl AgentTomlConfig {
    pub fn to_agent_config(&self, id: &str) -> AgentConfig {
        let base = AgentConfig::for_kind(self.kind).with_id(id);
        AgentConfig {
            priority: self.priority.unwrap_or(base.priority),
            weight: self.weight.unwrap_or(base.weight),
            active: self.active,
            objective: self.objective.clone().unwrap_or(base.objective.clone()),
            ..base
        }
    }
}

impl BuildsenseConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Agent roster described by this config, in id order.
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        match &self.agents {
            Some(agents) => agents
                .iter()
                .map(|(id, agent)| agent.to_agent_config(id))
                .collect(),
            None => default_agent_configs(),
        }
    }

    /// Apply `LLM_MAX_REQUESTS_PER_MINUTE` through `lookup` (normally
    /// `std::env::var`). The override also pins the window to one minute.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_REQUESTS_PER_MINUTE) {
            let parsed = raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "{ENV_MAX_REQUESTS_PER_MINUTE}='{raw}' is not a non-negative integer"
                ))
            })?;
            self.budget.requests_per_window = parsed;
            self.budget.window = Duration::from_secs(60);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.window.is_zero() {
            return Err(ConfigError::Invalid("budget.window must be > 0".into()));
        }
        if self.round.deadline.is_zero() {
            return Err(ConfigError::Invalid("round.deadline must be > 0".into()));
        }
        if self.round.delivery_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "round.delivery_timeout must be > 0".into(),
            ));
        }
        if self.round.call_timeout >= self.round.deadline {
            return Err(ConfigError::Invalid(format!(
                "round.call_timeout ({}) must be shorter than round.deadline ({})",
                humantime::format_duration(self.round.call_timeout),
                humantime::format_duration(self.round.deadline),
            )));
        }
        let confidence = self.round.fallback_confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::Invalid(format!(
                "round.fallback_confidence {confidence} outside [0,1]"
            )));
        }
        if !self.round.tie_epsilon.is_finite() || self.round.tie_epsilon < 0.0 {
            return Err(ConfigError::Invalid(
                "round.tie_epsilon must be a non-negative number".into(),
            ));
        }
        if self.coordinator.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "coordinator.interval must be > 0".into(),
            ));
        }
        if self.provider.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.provider is empty".into()));
        }
        for agent in self.agent_configs() {
            agent.validate()?;
        }
        Ok(())
    }
}

mod humantime_duration {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim())
            .map_err(|err| serde::de::Error::custom(format!("invalid duration '{s}': {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [global]
        instance_id = "bs-test"
        data_dir = "/tmp/buildsense"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = BuildsenseConfig::from_toml_str(MINIMAL).expect("minimal config parses");
        assert_eq!(config.budget.requests_per_window, 9);
        assert_eq!(config.budget.window, Duration::from_secs(60));
        assert_eq!(config.round.deadline, Duration::from_secs(8));
        assert_eq!(config.round.call_timeout, Duration::from_secs(4));
        assert_eq!(config.round.fallback_confidence, 0.5);
        assert_eq!(config.round.delivery_timeout, Duration::from_secs(5));
        assert_eq!(config.coordinator.interval, Duration::from_secs(300));
        assert_eq!(config.agent_configs().len(), 6);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn agents_table_overrides_defaults_per_entry() {
        let toml = format!(
            r#"{MINIMAL}
            [round]
            deadline = "2s"
            call_timeout = "500ms"

            [agents.hvac-comfort]
            kind = "comfort"
            weight = 0.4

            [agents.night-watch]
            kind = "security"
            active = false
            priority = 9
            "#
        );

        let config = BuildsenseConfig::from_toml_str(&toml).expect("config parses");
        let agents = config.agent_configs();

        assert_eq!(config.round.call_timeout, Duration::from_millis(500));
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].id, "hvac-comfort");
        assert_eq!(agents[0].weight, 0.4);
        assert_eq!(agents[0].priority, 3);
        assert_eq!(agents[1].kind, AgentKind::Security);
        assert_eq!(agents[1].priority, 9);
        assert!(!agents[1].active);
        config.validate().expect("valid");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = format!("{MINIMAL}\n[budget]\nrequests_per_minute = 5\n");
        assert!(BuildsenseConfig::from_toml_str(&toml).is_err());
    }

    #[test]
    fn call_timeout_must_fit_inside_deadline() {
        let toml = format!("{MINIMAL}\n[round]\ndeadline = \"3s\"\ncall_timeout = \"3s\"\n");
        let config = BuildsenseConfig::from_toml_str(&toml).expect("parses");
        let err = config.validate().expect_err("timeout equal to deadline");
        assert!(err.to_string().contains("call_timeout"));
    }

    #[test]
    fn zero_delivery_timeout_is_rejected() {
        let toml = format!("{MINIMAL}\n[round]\ndelivery_timeout = \"0s\"\n");
        let config = BuildsenseConfig::from_toml_str(&toml).expect("parses");
        let err = config.validate().expect_err("zero delivery timeout");
        assert!(err.to_string().contains("delivery_timeout"));
    }

    #[test]
    fn out_of_range_agent_weight_fails_validation() {
        let toml = format!("{MINIMAL}\n[agents.comfort]\nkind = \"comfort\"\nweight = 1.2\n");
        let config = BuildsenseConfig::from_toml_str(&toml).expect("parses");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAgent { .. })
        ));
    }

    #[test]
    fn env_override_replaces_budget() {
        let mut config = BuildsenseConfig::from_toml_str(MINIMAL).expect("parses");
        config.budget.window = Duration::from_secs(120);

        config
            .apply_env_overrides(|key| {
                (key == ENV_MAX_REQUESTS_PER_MINUTE).then(|| "15".to_string())
            })
            .expect("valid override");
        assert_eq!(config.budget.requests_per_window, 15);
        assert_eq!(config.budget.window, Duration::from_secs(60));

        let err = config
            .apply_env_overrides(|_| Some("lots".to_string()))
            .expect_err("non-numeric override");
        assert!(err.to_string().contains(ENV_MAX_REQUESTS_PER_MINUTE));
    }
}
