use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use buildsense_core::agent::{AgentConfig, AgentKind, PriorityClass, RosterSnapshot};
use buildsense_core::decision::{
    Decision, DeviceOutcome, DeviceResolution, ExcludedAgent, ExclusionReason, ResolutionMethod,
};
use buildsense_core::proposal::{is_unit_interval, ActionVerb, AxisScores, DeviceAction, Proposal};
use buildsense_core::room::{DeviceId, RoomId};

/// Identity of the round being resolved. Everything the arbiter needs
/// besides proposals and the roster, so that `resolve` stays pure.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub round_id: String,
    pub room_id: RoomId,
    pub decided_at: DateTime<Utc>,
    /// Devices of the room, sorted and unique.
    pub devices: Vec<DeviceId>,
}

/// A proposal admitted to arbitration with the roster entry it is judged by.
struct Admitted<'a> {
    proposal: &'a Proposal,
    config: &'a AgentConfig,
}

impl Admitted<'_> {
    fn strength(&self) -> f64 {
        self.proposal.confidence * self.config.weight
    }
}

/// Everything proposed for one (device, verb) pair.
struct Candidate<'a> {
    verb: ActionVerb,
    score: f64,
    supporters: BTreeSet<&'a str>,
    top_priority: PriorityClass,
    /// Smallest id among supporters holding `top_priority`.
    lead_agent: &'a str,
    /// Action of the strongest contributor; its parameters win.
    action: &'a DeviceAction,
    action_strength: f64,
    action_priority: PriorityClass,
    action_agent: &'a str,
}

impl<'a> Candidate<'a> {
    fn new(action: &'a DeviceAction, admitted: &Admitted<'a>) -> Self {
        let agent = admitted.config.id.as_str();
        Self {
            verb: action.verb,
            score: 0.0,
            supporters: BTreeSet::new(),
            top_priority: admitted.config.priority,
            lead_agent: agent,
            action,
            action_strength: admitted.strength(),
            action_priority: admitted.config.priority,
            action_agent: agent,
        }
    }

    fn add(&mut self, action: &'a DeviceAction, admitted: &Admitted<'a>) {
        let agent = admitted.config.id.as_str();
        let priority = admitted.config.priority;
        let strength = admitted.strength();

        self.score += strength;
        self.supporters.insert(agent);

        if priority > self.top_priority || (priority == self.top_priority && agent < self.lead_agent)
        {
            self.top_priority = priority;
            self.lead_agent = agent;
        }

        let stronger = strength
            .total_cmp(&self.action_strength)
            .then(priority.cmp(&self.action_priority))
            .then(self.action_agent.cmp(agent));
        if stronger == Ordering::Greater {
            self.action = action;
            self.action_strength = strength;
            self.action_priority = priority;
            self.action_agent = agent;
        }
    }

    /// Ordering among candidates whose scores tie: more distinct agents,
    /// then higher priority class, then smaller agent id, then verb.
    fn tie_break(&self, other: &Self) -> Ordering {
        other
            .supporters
            .len()
            .cmp(&self.supporters.len())
            .then(other.top_priority.cmp(&self.top_priority))
            .then(self.lead_agent.cmp(other.lead_agent))
            .then(self.verb.cmp(&other.verb))
    }
}

/// Merges one round's proposals into a single decision.
#[derive(Debug, Clone, Copy)]
pub struct Arbiter {
    tie_epsilon: f64,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self { tie_epsilon: 1e-6 }
    }
}

impl Arbiter {
    pub fn new(tie_epsilon: f64) -> Self {
        Self {
            tie_epsilon: tie_epsilon.max(0.0),
        }
    }

    /// Pure function of its inputs: identical context, proposals and roster
    /// always yield an identical decision.
    pub fn resolve(
        &self,
        ctx: &RoundContext,
        mut proposals: Vec<Proposal>,
        roster: &RosterSnapshot,
    ) -> Decision {
        proposals.sort_by(|a, b| {
            a.agent_id
                .cmp(&b.agent_id)
                .then_with(|| canonical(a).cmp(&canonical(b)))
        });
        let (admitted, excluded) = admit(&proposals, roster);

        let mut decision = Decision {
            round_id: ctx.round_id.clone(),
            room_id: ctx.room_id.clone(),
            decided_at: ctx.decided_at,
            method: ResolutionMethod::Escalation,
            actions: Vec::new(),
            resolutions: Vec::new(),
            proposals: Vec::new(),
            overridden: Vec::new(),
            excluded,
            scores: AxisScores::default(),
            slo_report: None,
        };

        if admitted.is_empty() {
            decision.resolutions = ctx
                .devices
                .iter()
                .map(|device_id| DeviceResolution {
                    device_id: device_id.clone(),
                    outcome: DeviceOutcome::Escalated,
                })
                .collect();
        } else if let Some(winner) = select_override(&admitted) {
            self.apply_override(ctx, &admitted, winner, &mut decision);
        } else {
            self.apply_weighted(ctx, &admitted, &mut decision);
        }

        decision.proposals = proposals;
        decision
    }

    fn apply_override(
        &self,
        ctx: &RoundContext,
        admitted: &[Admitted<'_>],
        winner: &Admitted<'_>,
        decision: &mut Decision,
    ) {
        let present_weight = present_weight(admitted);
        let score = winner.strength();

        decision.method = ResolutionMethod::Override;
        decision.actions = winner.proposal.actions.clone();
        decision.scores = winner.proposal.scores;
        decision.overridden = admitted
            .iter()
            .filter(|other| other.config.id != winner.config.id)
            .map(|other| other.config.id.clone())
            .collect();
        decision.resolutions = ctx
            .devices
            .iter()
            .map(|device_id| {
                let outcome = match winner
                    .proposal
                    .actions
                    .iter()
                    .find(|action| &action.device_id == device_id)
                {
                    Some(action) => DeviceOutcome::Resolved {
                        action: action.clone(),
                        score,
                        normalized_score: normalize(score, present_weight),
                        method: ResolutionMethod::Override,
                        supporters: vec![winner.config.id.clone()],
                    },
                    None => DeviceOutcome::Unchanged,
                };
                DeviceResolution {
                    device_id: device_id.clone(),
                    outcome,
                }
            })
            .collect();
    }

    fn apply_weighted(
        &self,
        ctx: &RoundContext,
        admitted: &[Admitted<'_>],
        decision: &mut Decision,
    ) {
        let present_weight = present_weight(admitted);
        let known: BTreeSet<&str> = ctx.devices.iter().map(String::as_str).collect();

        let mut by_device: BTreeMap<&str, BTreeMap<ActionVerb, Candidate<'_>>> = BTreeMap::new();
        for entry in admitted {
            let mut counted: BTreeSet<(&str, ActionVerb)> = BTreeSet::new();
            for action in &entry.proposal.actions {
                let device_id = action.device_id.as_str();
                if !known.contains(device_id) {
                    tracing::warn!(
                        room_id = %ctx.room_id,
                        agent_id = %entry.config.id,
                        device_id,
                        verb = %action.verb,
                        "action_for_unknown_device"
                    );
                    continue;
                }
                if !counted.insert((device_id, action.verb)) {
                    continue;
                }
                by_device
                    .entry(device_id)
                    .or_default()
                    .entry(action.verb)
                    .or_insert_with(|| Candidate::new(action, entry))
                    .add(action, entry);
            }
        }

        let mut any_majority = false;
        let mut winning_agents: BTreeSet<&str> = BTreeSet::new();

        for device_id in &ctx.devices {
            let Some(candidates) = by_device.get(device_id.as_str()) else {
                decision.resolutions.push(DeviceResolution {
                    device_id: device_id.clone(),
                    outcome: DeviceOutcome::Unchanged,
                });
                continue;
            };

            let best_score = candidates
                .values()
                .map(|candidate| candidate.score)
                .fold(f64::NEG_INFINITY, f64::max);
            let mut contenders: Vec<&Candidate<'_>> = candidates
                .values()
                .filter(|candidate| best_score - candidate.score <= self.tie_epsilon)
                .collect();
            contenders.sort_by(|a, b| a.tie_break(b));

            let Some(winner) = contenders.first() else {
                continue;
            };
            let method = if contenders.len() > 1 {
                any_majority = true;
                ResolutionMethod::Majority
            } else {
                ResolutionMethod::Weighted
            };

            let action = DeviceAction {
                device_id: device_id.clone(),
                verb: winner.verb,
                parameters: winner.action.parameters.clone(),
            };
            winning_agents.extend(winner.supporters.iter().copied());
            decision.actions.push(action.clone());
            decision.resolutions.push(DeviceResolution {
                device_id: device_id.clone(),
                outcome: DeviceOutcome::Resolved {
                    action,
                    score: winner.score,
                    normalized_score: normalize(winner.score, present_weight),
                    method,
                    supporters: winner.supporters.iter().map(|id| id.to_string()).collect(),
                },
            });
        }

        decision.method = if any_majority {
            ResolutionMethod::Majority
        } else {
            ResolutionMethod::Weighted
        };

        let contributors: Vec<&Admitted<'_>> = if winning_agents.is_empty() {
            admitted.iter().collect()
        } else {
            admitted
                .iter()
                .filter(|entry| winning_agents.contains(entry.config.id.as_str()))
                .collect()
        };
        decision.scores = aggregate_scores(&contributors);
    }
}

/// Split proposals into those the roster vouches for and exclusions.
/// Total order for proposals sharing an agent id.
fn canonical(proposal: &Proposal) -> String {
    serde_json::to_string(proposal).unwrap_or_default()
}

/// Proposals are expected sorted by agent id. Every copy of an id that
/// appears more than once is excluded.
fn admit<'a>(
    proposals: &'a [Proposal],
    roster: &'a RosterSnapshot,
) -> (Vec<Admitted<'a>>, Vec<ExcludedAgent>) {
    let mut admitted: Vec<Admitted<'a>> = Vec::with_capacity(proposals.len());
    let mut excluded = Vec::new();

    for (index, proposal) in proposals.iter().enumerate() {
        let duplicated = [index.checked_sub(1), Some(index + 1)]
            .into_iter()
            .flatten()
            .filter_map(|neighbour| proposals.get(neighbour))
            .any(|other| other.agent_id == proposal.agent_id);
        let reason = match roster.get(&proposal.agent_id) {
            None => Some(ExclusionReason::Unconfigured),
            Some(config) if !config.active => Some(ExclusionReason::Inactive),
            Some(_) if duplicated => Some(ExclusionReason::Failed {
                detail: "duplicate proposal".to_string(),
            }),
            Some(_) if !is_unit_interval(proposal.confidence) => Some(ExclusionReason::Failed {
                detail: format!("confidence {} outside [0,1]", proposal.confidence),
            }),
            Some(config) => {
                admitted.push(Admitted { proposal, config });
                None
            }
        };
        if let Some(reason) = reason {
            tracing::warn!(agent_id = %proposal.agent_id, ?reason, "proposal_not_admitted");
            excluded.push(ExcludedAgent::new(proposal.agent_id.clone(), reason));
        }
    }

    (admitted, excluded)
}

/// Overrides come only from emergency agents per the roster. With several,
/// the highest emergency level, then priority, then smallest id wins.
fn select_override<'a, 'b>(admitted: &'b [Admitted<'a>]) -> Option<&'b Admitted<'a>> {
    admitted
        .iter()
        .filter(|entry| {
            entry.config.kind == AgentKind::Emergency
                && entry.proposal.override_requested
                && !entry.proposal.actions.is_empty()
        })
        .min_by(|a, b| {
            b.proposal
                .emergency_level
                .cmp(&a.proposal.emergency_level)
                .then(b.config.priority.cmp(&a.config.priority))
                .then(a.config.id.cmp(&b.config.id))
        })
}

fn present_weight(admitted: &[Admitted<'_>]) -> f64 {
    admitted.iter().map(|entry| entry.config.weight).sum()
}

fn normalize(score: f64, present_weight: f64) -> f64 {
    if present_weight > 0.0 {
        score / present_weight
    } else {
        0.0
    }
}

fn aggregate_scores(contributors: &[&Admitted<'_>]) -> AxisScores {
    let mut total = AxisScores::default();
    let mut strength = 0.0;
    for entry in contributors {
        let s = entry.strength();
        total = total.add(&entry.proposal.scores.scaled(s));
        strength += s;
    }
    if strength > 0.0 {
        total.scaled(1.0 / strength)
    } else {
        AxisScores::default()
    }
}
