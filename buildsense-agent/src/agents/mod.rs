pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use buildsense_core::agent::{AgentConfig, AgentKind};
use buildsense_core::config::RoundConfig;
use buildsense_core::error::ProviderError;
use buildsense_core::proposal::{
    DeviceAction, FallbackReason, Proposal, ProposalSource, OVERRIDE_EMERGENCY_LEVEL,
};
use buildsense_core::room::RoomSnapshot;

use crate::llm::LlmClient;
use crate::rate_limiter::RateLimiter;
use crate::reasoning;

use self::rules::{rules_for, FallbackPolicy, RuleOutcome};

/// One objective-driven participant in a round.
///
/// `propose` never fails: provider trouble and budget denial end in a
/// fallback proposal.
#[async_trait]
pub trait Agent: Send + Sync {
    fn config(&self) -> &AgentConfig;

    async fn propose(&self, snapshot: &RoomSnapshot, limiter: &RateLimiter) -> Proposal;
}

/// Per-agent tunables taken from `[round]`.
#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub call_timeout: Duration,
    pub fallback_confidence: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&RoundConfig::default())
    }
}

impl From<&RoundConfig> for AgentSettings {
    fn from(round: &RoundConfig) -> Self {
        Self {
            call_timeout: round.call_timeout,
            fallback_confidence: round.fallback_confidence,
        }
    }
}

/// Model-backed agent with a deterministic rule set behind it.
pub struct ReasoningAgent {
    config: AgentConfig,
    client: Option<Arc<dyn LlmClient>>,
    rules: Box<dyn FallbackPolicy>,
    settings: AgentSettings,
}

impl ReasoningAgent {
    pub fn new(
        config: AgentConfig,
        client: Option<Arc<dyn LlmClient>>,
        settings: AgentSettings,
    ) -> Self {
        let rules = rules_for(config.kind);
        Self {
            config,
            client,
            rules,
            settings,
        }
    }

    async fn consult(
        &self,
        client: &dyn LlmClient,
        snapshot: &RoomSnapshot,
    ) -> Result<Proposal, ProviderError> {
        let system = reasoning::system_prompt(&self.config);
        let prompt = reasoning::room_prompt(snapshot);

        let raw = tokio::time::timeout(self.settings.call_timeout, client.complete(&system, &prompt))
            .await
            .map_err(|_| ProviderError::Timeout {
                elapsed: self.settings.call_timeout,
            })??;
        let response = reasoning::parse_response(&raw)?;

        let emergency_level = match self.config.kind {
            AgentKind::Emergency => response.emergency_level.unwrap_or(0),
            _ => 0,
        };
        Ok(Proposal {
            agent_id: self.config.id.clone(),
            kind: self.config.kind,
            priority: self.config.priority,
            override_requested: self.wants_override(emergency_level, snapshot, &response.actions),
            actions: response.actions,
            scores: response.scores,
            reasoning: response.reasoning,
            confidence: response.confidence,
            source: ProposalSource::ModelBacked,
            fallback_reason: None,
            emergency_level,
        })
    }

    fn fallback(&self, snapshot: &RoomSnapshot, reason: FallbackReason) -> Proposal {
        let RuleOutcome {
            actions,
            scores,
            reasoning,
            emergency_level,
        } = self.rules.evaluate(snapshot);

        Proposal {
            agent_id: self.config.id.clone(),
            kind: self.config.kind,
            priority: self.config.priority,
            override_requested: self.wants_override(emergency_level, snapshot, &actions),
            actions,
            scores,
            reasoning,
            confidence: self.settings.fallback_confidence,
            source: ProposalSource::Fallback,
            fallback_reason: Some(reason),
            emergency_level,
        }
    }

    /// Only emergency agents may override, and only with something to do.
    fn wants_override(&self, level: u8, snapshot: &RoomSnapshot, actions: &[DeviceAction]) -> bool {
        self.config.kind == AgentKind::Emergency
            && !actions.is_empty()
            && (level >= OVERRIDE_EMERGENCY_LEVEL || !snapshot.emergency_flags().is_empty())
    }
}

#[async_trait]
impl Agent for ReasoningAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn propose(&self, snapshot: &RoomSnapshot, limiter: &RateLimiter) -> Proposal {
        let Some(client) = self.client.as_deref() else {
            return self.fallback(snapshot, FallbackReason::NotConfigured);
        };

        if !limiter.try_acquire(1) {
            tracing::debug!(
                agent_id = %self.config.id,
                room_id = %snapshot.room_id,
                "agent_budget_denied"
            );
            return self.fallback(snapshot, FallbackReason::BudgetDenied);
        }

        match self.consult(client, snapshot).await {
            Ok(proposal) => {
                tracing::debug!(
                    agent_id = %self.config.id,
                    room_id = %snapshot.room_id,
                    provider = client.provider(),
                    actions = proposal.actions.len(),
                    confidence = proposal.confidence,
                    "agent_model_proposal"
                );
                proposal
            }
            Err(err) => {
                tracing::warn!(
                    agent_id = %self.config.id,
                    room_id = %snapshot.room_id,
                    provider = client.provider(),
                    error = %err,
                    "agent_fallback"
                );
                self.fallback(
                    snapshot,
                    FallbackReason::ProviderFailure {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }
}

/// One agent per roster entry, all sharing `client`.
pub fn build_agents(
    configs: &[AgentConfig],
    client: Option<Arc<dyn LlmClient>>,
    settings: AgentSettings,
) -> Vec<Arc<dyn Agent>> {
    configs
        .iter()
        .map(|config| {
            Arc::new(ReasoningAgent::new(config.clone(), client.clone(), settings))
                as Arc<dyn Agent>
        })
        .collect()
}
