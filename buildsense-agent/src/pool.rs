use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;

use buildsense_core::agent::AgentId;
use buildsense_core::decision::{ExcludedAgent, ExclusionReason};
use buildsense_core::proposal::Proposal;
use buildsense_core::room::RoomSnapshot;

use crate::agents::Agent;
use crate::rate_limiter::RateLimiter;

/// Proposals gathered for one round plus every agent that did not deliver.
#[derive(Debug, Default)]
pub struct Collected {
    /// Sorted by agent id.
    pub proposals: Vec<Proposal>,
    pub excluded: Vec<ExcludedAgent>,
}

/// Fans a snapshot out to agents and joins them under one deadline.
#[derive(Clone)]
pub struct AgentPool {
    limiter: Arc<RateLimiter>,
}

impl AgentPool {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    /// Run every active agent concurrently. Returns by `deadline` at the
    /// latest; agents still running then are aborted and reported as timed
    /// out.
    pub async fn collect(
        &self,
        snapshot: Arc<RoomSnapshot>,
        agents: &[Arc<dyn Agent>],
        deadline: Instant,
    ) -> Collected {
        let mut collected = Collected::default();
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<tokio::task::Id, AgentId> = HashMap::new();

        for agent in agents {
            let agent_id = agent.config().id.clone();
            if !agent.config().active {
                collected
                    .excluded
                    .push(ExcludedAgent::new(agent_id, ExclusionReason::Inactive));
                continue;
            }

            let agent = Arc::clone(agent);
            let snapshot = Arc::clone(&snapshot);
            let limiter = Arc::clone(&self.limiter);
            let handle = tasks.spawn(async move { agent.propose(&snapshot, &limiter).await });
            pending.insert(handle.id(), agent_id);
        }

        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, proposal)))) => {
                    pending.remove(&id);
                    collected.proposals.push(proposal);
                }
                Ok(Some(Err(err))) => {
                    let agent_id = pending.remove(&err.id()).unwrap_or_default();
                    tracing::error!(
                        agent_id = %agent_id,
                        room_id = %snapshot.room_id,
                        error = %err,
                        "agent_task_failed"
                    );
                    collected.excluded.push(ExcludedAgent::new(
                        agent_id,
                        ExclusionReason::Failed {
                            detail: err.to_string(),
                        },
                    ));
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    let mut late: Vec<AgentId> = pending.drain().map(|(_, id)| id).collect();
                    late.sort();
                    for agent_id in late {
                        tracing::warn!(
                            agent_id = %agent_id,
                            room_id = %snapshot.room_id,
                            "agent_timed_out"
                        );
                        collected
                            .excluded
                            .push(ExcludedAgent::new(agent_id, ExclusionReason::TimedOut));
                    }
                    break;
                }
            }
        }

        collected
            .proposals
            .sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        collected
            .excluded
            .sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        collected
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::agents::{build_agents, AgentSettings};
    use buildsense_core::agent::{default_agent_configs, AgentConfig, AgentKind};
    use buildsense_core::proposal::{AxisScores, ProposalSource};

    struct SlowAgent {
        config: AgentConfig,
        delay: Duration,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn config(&self) -> &AgentConfig {
            &self.config
        }

        async fn propose(&self, snapshot: &RoomSnapshot, _limiter: &RateLimiter) -> Proposal {
            tokio::time::sleep(self.delay).await;
            Proposal {
                agent_id: self.config.id.clone(),
                kind: self.config.kind,
                priority: self.config.priority,
                actions: Vec::new(),
                scores: AxisScores::default(),
                reasoning: format!("slow answer for {}", snapshot.room_id),
                confidence: 0.5,
                source: ProposalSource::Fallback,
                fallback_reason: None,
                emergency_level: 0,
                override_requested: false,
            }
        }
    }

    struct PanickingAgent(AgentConfig);

    #[async_trait]
    impl Agent for PanickingAgent {
        fn config(&self) -> &AgentConfig {
            &self.0
        }

        async fn propose(&self, _snapshot: &RoomSnapshot, _limiter: &RateLimiter) -> Proposal {
            panic!("rule table corrupted");
        }
    }

    fn slow(kind: AgentKind, secs: u64) -> Arc<dyn Agent> {
        Arc::new(SlowAgent {
            config: AgentConfig::for_kind(kind),
            delay: Duration::from_secs(secs),
        })
    }

    fn pool() -> AgentPool {
        AgentPool::new(Arc::new(RateLimiter::per_minute(9)))
    }

    fn room() -> Arc<RoomSnapshot> {
        Arc::new(RoomSnapshot::new("r-1", Utc::now()))
    }

    #[tokio::test]
    async fn collects_one_proposal_per_active_agent_in_id_order() {
        let agents = build_agents(&default_agent_configs(), None, AgentSettings::default());

        let collected = pool()
            .collect(room(), &agents, Instant::now() + Duration::from_secs(5))
            .await;

        let ids: Vec<_> = collected
            .proposals
            .iter()
            .map(|p| p.agent_id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec!["comfort", "emergency", "energy", "environmental", "occupancy", "security"]
        );
        assert!(collected.excluded.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_agents_are_excluded_at_the_deadline() {
        let agents = vec![
            slow(AgentKind::Comfort, 1),
            slow(AgentKind::Energy, 30),
            slow(AgentKind::Security, 60),
        ];
        let start = Instant::now();

        let collected = pool()
            .collect(room(), &agents, start + Duration::from_secs(8))
            .await;

        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(8) && waited < Duration::from_secs(9));
        assert_eq!(collected.proposals.len(), 1);
        assert_eq!(collected.proposals[0].agent_id, "comfort");
        assert_eq!(
            collected.excluded,
            vec![
                ExcludedAgent::new("energy", ExclusionReason::TimedOut),
                ExcludedAgent::new("security", ExclusionReason::TimedOut),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_agents_never_run() {
        let configs: Vec<_> = default_agent_configs()
            .into_iter()
            .map(AgentConfig::inactive)
            .collect();
        let agents = build_agents(&configs, None, AgentSettings::default());
        let start = Instant::now();

        let collected = pool()
            .collect(room(), &agents, start + Duration::from_secs(8))
            .await;

        assert!(collected.proposals.is_empty());
        assert_eq!(collected.excluded.len(), 6);
        assert!(collected
            .excluded
            .iter()
            .all(|e| e.reason == ExclusionReason::Inactive));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn panicking_agent_is_recorded_as_failed() {
        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(PanickingAgent(AgentConfig::for_kind(AgentKind::Occupancy))),
            slow(AgentKind::Comfort, 0),
        ];

        let collected = pool()
            .collect(room(), &agents, Instant::now() + Duration::from_secs(5))
            .await;

        assert_eq!(collected.proposals.len(), 1);
        assert_eq!(collected.excluded[0].agent_id, "occupancy");
        assert!(matches!(
            collected.excluded[0].reason,
            ExclusionReason::Failed { .. }
        ));
    }
}
