use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tokio::time::Instant;

use buildsense_agent::agents::{build_agents, Agent, AgentSettings};
use buildsense_agent::llm::LlmClient;
use buildsense_agent::pool::AgentPool;
use buildsense_core::agent::{AgentConfig, RosterSnapshot};
use buildsense_core::config::RoundConfig;
use buildsense_core::decision::{Decision, ExcludedAgent, ExclusionReason, RoundPhase};
use buildsense_core::error::{DispatchError, RecorderError};
use buildsense_core::room::{RoomId, RoomSnapshot};
use buildsense_core::slo::evaluate_slos;

use crate::arbiter::{Arbiter, RoundContext};
use crate::dispatch::CommandDispatcher;
use crate::recorder::DecisionRecorder;

/// Round timing taken from `[round]`.
#[derive(Debug, Clone, Copy)]
pub struct RoundSettings {
    pub deadline: Duration,
    pub sensor_max_age: Duration,
    pub tie_epsilon: f64,
    pub delivery_timeout: Duration,
    pub agent: AgentSettings,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self::from(&RoundConfig::default())
    }
}

impl From<&RoundConfig> for RoundSettings {
    fn from(round: &RoundConfig) -> Self {
        Self {
            deadline: round.deadline,
            sensor_max_age: round.sensor_max_age,
            tie_epsilon: round.tie_epsilon,
            delivery_timeout: round.delivery_timeout,
            agent: AgentSettings::from(round),
        }
    }
}

/// Result of one round. The decision is always present; delivery failures
/// are reported next to it.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub decision: Decision,
    /// Every state the round passed through, in order.
    pub phases: Vec<RoundPhase>,
    pub dispatch_error: Option<String>,
    pub recorder_error: Option<String>,
}

impl RoundOutcome {
    pub fn delivered(&self) -> bool {
        self.dispatch_error.is_none() && self.recorder_error.is_none()
    }
}

/// Roster and the agents built from it, swapped as one unit.
struct Roster {
    snapshot: RosterSnapshot,
    agents: Vec<Arc<dyn Agent>>,
}

/// Runs arbitration rounds: at most one in flight per room, any number of
/// rooms in parallel.
pub struct RoundCoordinator {
    pool: AgentPool,
    arbiter: Arbiter,
    settings: RoundSettings,
    client: Option<Arc<dyn LlmClient>>,
    roster: RwLock<Arc<Roster>>,
    room_locks: Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>,
    recorder: Arc<dyn DecisionRecorder>,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl RoundCoordinator {
    pub fn new(
        pool: AgentPool,
        settings: RoundSettings,
        client: Option<Arc<dyn LlmClient>>,
        recorder: Arc<dyn DecisionRecorder>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            pool,
            arbiter: Arbiter::new(settings.tie_epsilon),
            settings,
            client,
            roster: RwLock::new(Arc::new(Roster {
                snapshot: RosterSnapshot::default(),
                agents: Vec::new(),
            })),
            room_locks: Mutex::new(HashMap::new()),
            recorder,
            dispatcher,
        }
    }

    /// Replace the agent roster. Rounds already running keep the roster
    /// they started with.
    pub fn update_roster(&self, configs: &[AgentConfig]) {
        let snapshot = RosterSnapshot::capture(configs);
        let agents = build_agents(snapshot.configs(), self.client.clone(), self.settings.agent);
        self.install(snapshot, agents);
    }

    /// Install prebuilt agents. The roster is captured from their configs.
    pub fn install_agents(&self, agents: Vec<Arc<dyn Agent>>) {
        let configs: Vec<AgentConfig> = agents.iter().map(|a| a.config().clone()).collect();
        let snapshot = RosterSnapshot::capture(&configs);
        let mut agents = agents;
        agents.retain(|agent| {
            snapshot
                .get(&agent.config().id)
                .is_some_and(|config| config == agent.config())
        });
        self.install(snapshot, agents);
    }

    fn install(&self, snapshot: RosterSnapshot, agents: Vec<Arc<dyn Agent>>) {
        tracing::info!(
            agents = snapshot.configs().len(),
            active = snapshot.active().count(),
            rejected = snapshot.rejected().len(),
            "roster_updated"
        );
        let roster = Arc::new(Roster { snapshot, agents });
        let mut guard = self
            .roster
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = roster;
    }

    fn current_roster(&self) -> Arc<Roster> {
        let guard = self
            .roster
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&*guard)
    }

    fn room_lock(&self, room_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .room_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(room_id.to_string()).or_default().clone()
    }

    /// Forget a room's lock once no round holds or waits on it.
    fn release_room_lock(&self, room_id: &str, room_lock: Arc<AsyncMutex<()>>) {
        drop(room_lock);
        let mut locks = self
            .room_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(room_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(room_id);
        }
    }

    pub async fn run_round(&self, snapshot: RoomSnapshot) -> RoundOutcome {
        let room_id = snapshot.room_id.clone();
        let room_lock = self.room_lock(&room_id);
        let outcome = {
            let _in_flight = room_lock.lock().await;
            self.run_locked(snapshot).await
        };
        self.release_room_lock(&room_id, room_lock);
        outcome
    }

    async fn run_locked(&self, mut snapshot: RoomSnapshot) -> RoundOutcome {
        let roster = self.current_roster();
        let round_id = uuid::Uuid::new_v4().to_string();
        let room_id = snapshot.room_id.clone();
        let mut phases = vec![RoundPhase::Collecting];

        tracing::info!(
            room_id = %room_id,
            round_id = %round_id,
            agents = roster.agents.len(),
            devices = snapshot.devices.len(),
            phase = %RoundPhase::Collecting,
            "round_started"
        );

        let stale = snapshot
            .sensors
            .prune_stale(Utc::now(), self.settings.sensor_max_age);
        if !stale.is_empty() {
            tracing::warn!(room_id = %room_id, ?stale, "stale_sensors_pruned");
        }

        let snapshot = Arc::new(snapshot);
        let collected = self
            .pool
            .collect(
                Arc::clone(&snapshot),
                &roster.agents,
                Instant::now() + self.settings.deadline,
            )
            .await;

        phases.push(RoundPhase::Resolving);
        tracing::debug!(
            room_id = %room_id,
            round_id = %round_id,
            proposals = collected.proposals.len(),
            excluded = collected.excluded.len(),
            phase = %RoundPhase::Resolving,
            "round_resolving"
        );

        let ctx = RoundContext {
            round_id: round_id.clone(),
            room_id: room_id.clone(),
            decided_at: Utc::now(),
            devices: snapshot.device_ids(),
        };
        let mut decision = self
            .arbiter
            .resolve(&ctx, collected.proposals, &roster.snapshot);
        decision.excluded.extend(collected.excluded);
        decision
            .excluded
            .extend(roster.snapshot.rejected().iter().map(|(agent_id, detail)| {
                ExcludedAgent::new(
                    agent_id.clone(),
                    ExclusionReason::InvalidConfig {
                        detail: detail.clone(),
                    },
                )
            }));
        decision
            .excluded
            .sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        decision.slo_report = Some(evaluate_slos(&snapshot));

        let resolved = RoundPhase::after_resolution(decision.method);
        phases.push(resolved);
        tracing::info!(
            room_id = %room_id,
            round_id = %round_id,
            method = %decision.method,
            actions = decision.actions.len(),
            overridden = decision.overridden.len(),
            excluded = decision.excluded.len(),
            phase = %resolved,
            "round_resolved"
        );
        for device_id in decision.escalated_devices() {
            tracing::warn!(
                room_id = %room_id,
                round_id = %round_id,
                device_id = %device_id,
                "device_escalated"
            );
        }

        let dispatch_error = if decision.actions.is_empty() {
            None
        } else {
            let dispatched = tokio::time::timeout(
                self.settings.delivery_timeout,
                self.dispatcher.dispatch(&room_id, &decision.actions),
            )
            .await
            .unwrap_or(Err(DispatchError::TimedOut(self.settings.delivery_timeout)));
            match dispatched {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(
                        room_id = %room_id,
                        round_id = %round_id,
                        error = %err,
                        "dispatch_failed"
                    );
                    Some(err.to_string())
                }
            }
        };

        let recorded = tokio::time::timeout(
            self.settings.delivery_timeout,
            self.recorder.record(&decision),
        )
        .await
        .unwrap_or(Err(RecorderError::TimedOut(self.settings.delivery_timeout)));
        let recorder_error = match recorded {
            Ok(()) => None,
            Err(err) => {
                tracing::error!(
                    room_id = %room_id,
                    round_id = %round_id,
                    error = %err,
                    "decision_record_failed"
                );
                Some(err.to_string())
            }
        };

        phases.push(RoundPhase::Recorded);
        tracing::info!(
            room_id = %room_id,
            round_id = %round_id,
            method = %decision.method,
            recorded = recorder_error.is_none(),
            phase = %RoundPhase::Recorded,
            "round_recorded"
        );

        RoundOutcome {
            decision,
            phases,
            dispatch_error,
            recorder_error,
        }
    }

    /// One round per snapshot. Different rooms run in parallel; repeated
    /// rooms queue behind each other. Outcomes are ordered by room id.
    pub async fn run_all(self: &Arc<Self>, snapshots: Vec<RoomSnapshot>) -> Vec<RoundOutcome> {
        let mut tasks = JoinSet::new();
        for snapshot in snapshots {
            let coordinator = Arc::clone(self);
            tasks.spawn(async move { coordinator.run_round(snapshot).await });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(error = %err, "round_task_failed"),
            }
        }
        outcomes.sort_by(|a, b| {
            a.decision
                .room_id
                .cmp(&b.decision.room_id)
                .then(a.decision.decided_at.cmp(&b.decision.decided_at))
        });
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use buildsense_agent::rate_limiter::RateLimiter;
    use buildsense_core::agent::{default_agent_configs, AgentKind};
    use buildsense_core::decision::ResolutionMethod;
    use buildsense_core::proposal::{AxisScores, Proposal, ProposalSource};
    use buildsense_core::room::{DeviceKind, DeviceState};

    use super::*;
    use crate::dispatch::LoggingDispatcher;
    use crate::recorder::MemoryDecisionRecorder;
    use buildsense_core::error::{DispatchError, RecorderError};
    use buildsense_core::proposal::{ActionVerb, DeviceAction};
    use buildsense_core::room::RoomId;

    struct StalledRecorder;

    #[async_trait]
    impl DecisionRecorder for StalledRecorder {
        async fn record(&self, _decision: &Decision) -> Result<(), RecorderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct StalledDispatcher;

    #[async_trait]
    impl CommandDispatcher for StalledDispatcher {
        async fn dispatch(
            &self,
            _room_id: &RoomId,
            _actions: &[DeviceAction],
        ) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    /// Always proposes switching `light-1` off.
    struct SwitchOffAgent(AgentConfig);

    #[async_trait]
    impl Agent for SwitchOffAgent {
        fn config(&self) -> &AgentConfig {
            &self.0
        }

        async fn propose(&self, _snapshot: &RoomSnapshot, _limiter: &RateLimiter) -> Proposal {
            Proposal {
                agent_id: self.0.id.clone(),
                kind: self.0.kind,
                priority: self.0.priority,
                actions: vec![DeviceAction::new("light-1", ActionVerb::TurnOff)],
                scores: AxisScores::default(),
                reasoning: "switch off".to_string(),
                confidence: 0.8,
                source: ProposalSource::Fallback,
                fallback_reason: None,
                emergency_level: 0,
                override_requested: false,
            }
        }
    }

    /// Sleeps, then checks that no other round for the room is running.
    struct ExclusiveAgent {
        config: AgentConfig,
        running: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for ExclusiveAgent {
        fn config(&self) -> &AgentConfig {
            &self.config
        }

        async fn propose(&self, snapshot: &RoomSnapshot, _limiter: &RateLimiter) -> Proposal {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Proposal {
                agent_id: self.config.id.clone(),
                kind: self.config.kind,
                priority: self.config.priority,
                actions: Vec::new(),
                scores: AxisScores::default(),
                reasoning: format!("checked {}", snapshot.room_id),
                confidence: 0.5,
                source: ProposalSource::Fallback,
                fallback_reason: None,
                emergency_level: 0,
                override_requested: false,
            }
        }
    }

    fn coordinator(recorder: Arc<MemoryDecisionRecorder>) -> RoundCoordinator {
        RoundCoordinator::new(
            AgentPool::new(Arc::new(RateLimiter::per_minute(9))),
            RoundSettings::default(),
            None,
            recorder,
            Arc::new(LoggingDispatcher),
        )
    }

    fn room(room_id: &str) -> RoomSnapshot {
        let mut snapshot = RoomSnapshot::new(room_id, Utc::now());
        snapshot.devices = vec![
            DeviceState::new("hvac-1", DeviceKind::Hvac, true),
            DeviceState::new("light-1", DeviceKind::Lighting, true),
        ];
        snapshot
    }

    #[tokio::test]
    async fn round_walks_the_state_machine_and_records() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let coordinator = coordinator(recorder.clone());
        coordinator.update_roster(&default_agent_configs());

        let outcome = coordinator.run_round(room("r-1")).await;

        assert_eq!(outcome.phases.first(), Some(&RoundPhase::Collecting));
        assert_eq!(outcome.phases[1], RoundPhase::Resolving);
        assert_eq!(outcome.phases.last(), Some(&RoundPhase::Recorded));
        assert!(outcome.delivered());
        assert_eq!(outcome.decision.proposals.len(), 6);
        assert!(outcome.decision.slo_report.is_some());
        assert_eq!(recorder.decisions(), vec![outcome.decision]);
    }

    #[tokio::test]
    async fn empty_roster_escalates_and_still_records() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let coordinator = coordinator(recorder.clone());

        let outcome = coordinator.run_round(room("r-1")).await;

        assert_eq!(outcome.decision.method, ResolutionMethod::Escalation);
        assert_eq!(outcome.phases[2], RoundPhase::Escalated);
        assert_eq!(outcome.decision.escalated_devices().count(), 2);
        assert_eq!(recorder.decisions().len(), 1);
    }

    #[tokio::test]
    async fn recorder_outage_keeps_the_decision() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        recorder.set_unavailable(true);
        let coordinator = coordinator(recorder.clone());
        coordinator.update_roster(&default_agent_configs());

        let outcome = coordinator.run_round(room("r-1")).await;

        assert!(outcome.recorder_error.is_some());
        assert_eq!(outcome.phases.last(), Some(&RoundPhase::Recorded));
        assert_eq!(outcome.decision.room_id, "r-1");
        assert!(recorder.decisions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_recorder_times_out_and_frees_the_room() {
        let coordinator = RoundCoordinator::new(
            AgentPool::new(Arc::new(RateLimiter::per_minute(9))),
            RoundSettings::default(),
            None,
            Arc::new(StalledRecorder),
            Arc::new(LoggingDispatcher),
        );
        coordinator.update_roster(&default_agent_configs());
        let settings = RoundSettings::default();
        let bound = settings.deadline + settings.delivery_timeout * 2;
        let start = Instant::now();

        let first = tokio::time::timeout(bound, coordinator.run_round(room("r-1")))
            .await
            .expect("round finishes despite a stalled recorder");
        let second = tokio::time::timeout(bound, coordinator.run_round(room("r-1")))
            .await
            .expect("next round for the room is not blocked");

        assert!(start.elapsed() < bound * 2);
        for outcome in [&first, &second] {
            let error = outcome.recorder_error.as_deref().expect("timeout reported");
            assert!(error.contains("did not answer"));
            assert_eq!(outcome.phases.last(), Some(&RoundPhase::Recorded));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_dispatcher_times_out_and_still_records() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let coordinator = RoundCoordinator::new(
            AgentPool::new(Arc::new(RateLimiter::per_minute(9))),
            RoundSettings::default(),
            None,
            recorder.clone(),
            Arc::new(StalledDispatcher),
        );
        coordinator.install_agents(vec![Arc::new(SwitchOffAgent(AgentConfig::for_kind(
            AgentKind::Energy,
        )))]);
        let settings = RoundSettings::default();

        let outcome = tokio::time::timeout(
            settings.deadline + settings.delivery_timeout * 2,
            coordinator.run_round(room("r-1")),
        )
        .await
        .expect("round finishes despite a stalled dispatcher");

        assert_eq!(outcome.decision.actions.len(), 1);
        assert!(outcome.dispatch_error.is_some());
        assert!(outcome.recorder_error.is_none());
        assert_eq!(recorder.decisions(), vec![outcome.decision]);
    }

    #[tokio::test]
    async fn room_locks_are_dropped_once_rounds_finish() {
        let coordinator = Arc::new(coordinator(Arc::new(MemoryDecisionRecorder::new())));
        coordinator.update_roster(&default_agent_configs());

        let outcomes = coordinator
            .run_all(vec![room("r-1"), room("r-1"), room("r-2"), room("r-3")])
            .await;

        assert_eq!(outcomes.len(), 4);
        let locks = coordinator
            .room_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn invalid_roster_entries_are_reported_as_excluded() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let coordinator = coordinator(recorder);
        let mut configs = default_agent_configs();
        configs[0].weight = 1.5;
        let broken_id = configs[0].id.clone();
        coordinator.update_roster(&configs);

        let outcome = coordinator.run_round(room("r-1")).await;

        assert_eq!(outcome.decision.proposals.len(), 5);
        let excluded = outcome
            .decision
            .excluded
            .iter()
            .find(|e| e.agent_id == broken_id)
            .expect("rejected agent listed");
        assert!(matches!(
            excluded.reason,
            ExclusionReason::InvalidConfig { .. }
        ));
    }

    #[tokio::test]
    async fn roster_updates_apply_to_the_next_round() {
        let recorder = Arc::new(MemoryDecisionRecorder::new());
        let coordinator = coordinator(recorder);
        coordinator.update_roster(&default_agent_configs());
        let first = coordinator.run_round(room("r-1")).await;

        let configs: Vec<_> = default_agent_configs()
            .into_iter()
            .map(|config| {
                if config.kind == AgentKind::Energy {
                    config.inactive()
                } else {
                    config
                }
            })
            .collect();
        coordinator.update_roster(&configs);
        let second = coordinator.run_round(room("r-1")).await;

        assert_eq!(first.decision.proposals.len(), 6);
        assert_eq!(second.decision.proposals.len(), 5);
        assert_eq!(
            second.decision.excluded,
            vec![ExcludedAgent::new("energy", ExclusionReason::Inactive)]
        );
        assert_ne!(first.decision.round_id, second.decision.round_id);
    }

    #[tokio::test]
    async fn rounds_for_one_room_never_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let coordinator = Arc::new(coordinator(Arc::new(MemoryDecisionRecorder::new())));
        coordinator.install_agents(vec![Arc::new(ExclusiveAgent {
            config: AgentConfig::for_kind(AgentKind::Comfort),
            running: running.clone(),
            overlaps: overlaps.clone(),
        })]);

        let outcomes = coordinator
            .run_all(vec![room("r-1"), room("r-1"), room("r-1")])
            .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn different_rooms_run_in_parallel() {
        let coordinator = Arc::new(coordinator(Arc::new(MemoryDecisionRecorder::new())));
        coordinator.install_agents(vec![Arc::new(ExclusiveAgent {
            config: AgentConfig::for_kind(AgentKind::Comfort),
            running: Arc::new(AtomicUsize::new(0)),
            overlaps: Arc::new(AtomicUsize::new(0)),
        })]);
        let start = std::time::Instant::now();

        let outcomes = coordinator
            .run_all((0..8).map(|i| room(&format!("r-{i}"))).collect())
            .await;

        let rooms: Vec<_> = outcomes
            .iter()
            .map(|o| o.decision.room_id.as_str())
            .collect();
        assert_eq!(rooms.len(), 8);
        assert!(rooms.windows(2).all(|w| w[0] <= w[1]));
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
