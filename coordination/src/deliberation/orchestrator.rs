//! Deliberation orchestrator — drives the six-phase cycle protocol.
//!
//! Owns the agents, the session history and every theory, discussion,
//! discovery and experiment record. One cycle runs at a time: every public
//! operation takes `&mut self`, so the owner decides how calls are
//! serialized (the server wraps the orchestrator in a mutex).
//!
//! Inside a cycle nothing is fatal. Agent failures become `success: false`
//! results, experiment failures become `experiment_error` events, and the
//! cycle always reaches its discovery check.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::consensus::{ConsensusRule, ConsensusTally};
use super::records::{
    resolve_theory, AgentRef, AgentTurn, Challenge, CyclePhase, CycleRecord, Discovery,
    Discussion, DiscussionKind, DiscussionMessage, ExperimentFailure, ExperimentLink, Session,
    SessionSummary, Theory, TheoryStatus,
};
use super::selection::PeerSelector;
use crate::agent::prompt::challenge_message;
use crate::agent::{
    Agent, AgentAction, AgentResult, AgentSettings, AgentSummary, Language, PeerMessage,
    ThinkContext, TheoryBrief,
};
use crate::config::DeliberationConfig;
use crate::events::{DiscoveryEvent, SessionEndReason, SharedEventBus};
use crate::experiment::{ExperimentError, ExperimentFacade, ExperimentRecord, Observation};
use crate::gateway::{BackendKind, GatewaySet};
use crate::persona::{Persona, PersonaRegistry, Role};

/// Name used for questions and experiments that come from outside the council.
pub const HUMAN_OBSERVER: &str = "Human Observer";

#[derive(Debug, Error)]
pub enum DeliberationError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("no agents registered")]
    NoAgents,

    #[error("no gateway configured for backend {0}")]
    MissingGateway(BackendKind),

    #[error(transparent)]
    Experiment(#[from] ExperimentError),
}

/// Result of a single-shot supermajority exploration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationReport {
    pub topic: String,
    /// Every agent's result, in registration order.
    pub results: Vec<AgentTurn>,
    pub tally: ConsensusTally,
    /// Name of the highest-agreement theory, if any was proposed.
    #[serde(default)]
    pub best_theory: Option<String>,
    #[serde(default)]
    pub discovery: Option<Discovery>,
    pub timestamp: DateTime<Utc>,
}

/// Read-only snapshot for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub running: bool,
    pub cycle_count: u64,
    pub language: Language,
    #[serde(default)]
    pub session: Option<SessionSummary>,
    pub agents: Vec<AgentSummary>,
    pub theory_count: usize,
    pub validated_theories: usize,
    pub discovery_count: usize,
    pub discussion_count: usize,
    pub experiment_count: usize,
}

/// Records produced while a cycle is in flight.
#[derive(Default)]
struct CycleWork {
    phases: Vec<CyclePhase>,
    new_theories: Vec<String>,
    challenges: Vec<Challenge>,
    experiments: Vec<ExperimentRecord>,
    observations: Vec<Observation>,
    experiment_failures: Vec<ExperimentFailure>,
    discussions: Vec<Discussion>,
    discoveries: Vec<Discovery>,
}

impl CycleWork {
    fn complete(&mut self, phase: CyclePhase) {
        debug_assert_eq!(
            self.phases.last().and_then(|p| p.next()).unwrap_or(CyclePhase::IndependentThinking),
            phase,
            "cycle phases out of order"
        );
        debug!(phase = %phase, "Phase complete");
        self.phases.push(phase);
    }
}

fn agent_ref(agent: &Agent) -> AgentRef {
    AgentRef {
        agent_id: agent.id().to_string(),
        agent_key: agent.key().to_string(),
        agent_name: agent.name().to_string(),
    }
}

fn observer_ref() -> AgentRef {
    AgentRef {
        agent_id: "human".to_string(),
        agent_key: "human".to_string(),
        agent_name: HUMAN_OBSERVER.to_string(),
    }
}

/// Publish the outcome of one think call.
fn announce(events: &SharedEventBus, turn: &AgentTurn) {
    let result = &turn.result;
    let event = if result.success {
        DiscoveryEvent::AgentThought {
            agent: turn.agent.clone(),
            thinking: result.thinking.clone(),
            agreement: result.agreement,
            focus: result.focus.clone(),
            theory: result.theory.as_ref().map(|t| t.name.clone()),
            actions: result.actions.len(),
        }
    } else {
        DiscoveryEvent::AgentError {
            agent: turn.agent.clone(),
            error: result.error.clone().unwrap_or_else(|| result.thinking.clone()),
        }
    };
    events.publish(event);
}

/// Run `think` on every selected agent. Results come back in the order the
/// agents were given, whatever order the calls finish in.
async fn think_all<'a>(
    agents: impl Iterator<Item = &'a mut Agent>,
    context: &ThinkContext,
    events: &SharedEventBus,
    parallel: bool,
) -> Vec<AgentTurn> {
    let agents: Vec<&mut Agent> = agents.collect();
    for agent in &agents {
        events.publish(DiscoveryEvent::AgentThinking {
            agent: agent_ref(agent),
            cycle: context.cycle,
        });
    }

    let turns: Vec<AgentTurn> = if parallel {
        join_all(agents.into_iter().map(|agent| async move {
            let result = agent.think(context).await;
            AgentTurn {
                agent: agent_ref(agent),
                role: agent.role(),
                result,
            }
        }))
        .await
    } else {
        let mut turns = Vec::with_capacity(agents.len());
        for agent in agents {
            let result = agent.think(context).await;
            turns.push(AgentTurn {
                agent: agent_ref(agent),
                role: agent.role(),
                result,
            });
        }
        turns
    };

    for turn in &turns {
        announce(events, turn);
    }
    turns
}

/// The deliberation orchestrator.
///
/// Usage:
/// 1. Build with [`Orchestrator::from_registry`]
/// 2. `start_session()` with a topic
/// 3. `run_cycle()` as many times as wanted
/// 4. `stop_session()`
///
/// `explore_topic()` and `query_agent()` work with or without a session.
pub struct Orchestrator {
    agents: Vec<Agent>,
    facade: Box<dyn ExperimentFacade>,
    events: SharedEventBus,
    config: DeliberationConfig,
    rule: ConsensusRule,
    selector: PeerSelector,
    language: Language,
    sessions: Vec<Session>,
    theories: Vec<Theory>,
    discussions: Vec<Discussion>,
    discoveries: Vec<Discovery>,
    experiments: Vec<ExperimentRecord>,
    peer_messages: Vec<PeerMessage>,
    cycle_count: u64,
}

impl Orchestrator {
    /// Orchestrator over already-built agents, kept in the given order.
    pub fn new(
        agents: Vec<Agent>,
        facade: Box<dyn ExperimentFacade>,
        events: SharedEventBus,
        config: DeliberationConfig,
    ) -> Result<Self, DeliberationError> {
        if agents.is_empty() {
            return Err(DeliberationError::NoAgents);
        }
        Ok(Self {
            agents,
            facade,
            events,
            rule: config.consensus_rule(),
            selector: PeerSelector::new(config.relevance_jitter, config.selection_seed),
            config,
            language: Language::default(),
            sessions: Vec::new(),
            theories: Vec::new(),
            discussions: Vec::new(),
            discoveries: Vec::new(),
            experiments: Vec::new(),
            peer_messages: Vec::new(),
            cycle_count: 0,
        })
    }

    /// One agent per persona, each bound to the gateway of its backend.
    pub fn from_registry(
        registry: &PersonaRegistry,
        gateways: &GatewaySet,
        settings: AgentSettings,
        facade: Box<dyn ExperimentFacade>,
        events: SharedEventBus,
        config: DeliberationConfig,
    ) -> Result<Self, DeliberationError> {
        let agents = registry
            .iter()
            .map(|persona| {
                let gateway = gateways
                    .get(persona.backend)
                    .ok_or(DeliberationError::MissingGateway(persona.backend))?;
                Ok(Agent::new(Arc::clone(persona), gateway, settings))
            })
            .collect::<Result<Vec<_>, DeliberationError>>()?;
        info!(agents = agents.len(), "Orchestrator initialized");
        Self::new(agents, facade, events, config)
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    // ── Session control ──────────────────────────────────────────────

    /// Open a session. An active session is closed first.
    pub fn start_session(&mut self, topic: Option<&str>, language: Option<Language>) -> SessionSummary {
        if self.is_running() {
            self.close_session(SessionEndReason::Replaced);
        }
        if let Some(language) = language {
            self.set_language(language);
        }
        let topic = topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.config.default_topic)
            .to_string();

        let session = Session::new(&topic, self.language);
        info!(session_id = %session.id, %topic, language = %self.language, "Session started");
        self.events.publish(DiscoveryEvent::SessionStarted {
            session_id: session.id.clone(),
            topic,
            language: self.language,
        });
        let summary = session.summary();
        self.sessions.push(session);
        summary
    }

    pub fn stop_session(&mut self) -> Result<SessionSummary, DeliberationError> {
        if !self.is_running() {
            return Err(DeliberationError::NoActiveSession);
        }
        self.close_session(SessionEndReason::Stopped)
            .ok_or(DeliberationError::NoActiveSession)
    }

    fn close_session(&mut self, reason: SessionEndReason) -> Option<SessionSummary> {
        let session = self.sessions.last_mut().filter(|s| s.is_active())?;
        session.ended_at = Some(Utc::now());
        let summary = session.summary();
        info!(session_id = %summary.id, cycles = summary.cycle_count, %reason, "Session ended");
        self.events.publish(DiscoveryEvent::SessionEnded {
            session_id: summary.id.clone(),
            topic: summary.topic.clone(),
            cycles: summary.cycle_count,
            duration_ms: summary.duration_ms.unwrap_or_default(),
            reason,
        });
        Some(summary)
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
        info!(%language, "Language changed");
        self.events.publish(DiscoveryEvent::LanguageChanged { language });
    }

    // ── Cycle protocol ───────────────────────────────────────────────

    /// Run one full pass of the six-phase protocol for the active session.
    ///
    /// Rejected with [`DeliberationError::NoActiveSession`] before anything
    /// changes when no session is open.
    pub async fn run_cycle(&mut self) -> Result<CycleRecord, DeliberationError> {
        let (session_id, topic) = match self.current_session() {
            Some(session) => (session.id.clone(), session.topic.clone()),
            None => return Err(DeliberationError::NoActiveSession),
        };

        self.cycle_count += 1;
        let number = self.cycle_count;
        let started_at = Utc::now();
        let mut work = CycleWork::default();
        info!(cycle = number, %session_id, %topic, "Cycle started");
        self.events.publish(DiscoveryEvent::CycleStarted {
            session_id: session_id.clone(),
            cycle: number,
            topic: topic.clone(),
        });

        // 1. Independent thinking
        let context = self.build_context(number, &topic);
        let events = Arc::clone(&self.events);
        let turns = think_all(
            self.agents.iter_mut().filter(|a| !a.is_skeptic()),
            &context,
            &events,
            self.config.parallel_thinking,
        )
        .await;
        work.complete(CyclePhase::IndependentThinking);

        // 2. Theory extraction, then support for existing theories
        self.extract_theories(&turns, number, &mut work);
        self.apply_support(&turns, number);
        work.complete(CyclePhase::TheoryExtraction);

        // 3. Skeptic challenge
        self.challenge_theories(&turns, &mut work).await;
        work.complete(CyclePhase::SkepticChallenge);

        // 4. Experiment execution
        self.execute_experiments(&turns, &mut work);
        work.complete(CyclePhase::ExperimentExecution);

        // 5. Discussion
        self.run_discussions(&turns, number, &mut work).await;
        work.complete(CyclePhase::Discussion);

        // 6. Discovery check
        work.discoveries.extend(self.check_discoveries());
        work.discoveries.extend(self.record_connections(&turns, number));
        work.complete(CyclePhase::DiscoveryCheck);

        self.peer_messages = turns
            .iter()
            .filter(|t| t.result.success)
            .filter_map(|t| {
                t.result.message_to_others.as_ref().map(|m| PeerMessage {
                    from: t.agent.agent_name.clone(),
                    content: m.clone(),
                })
            })
            .collect();

        let consensus = self.rule.tally(&turns);
        let record = CycleRecord {
            number,
            session_id: session_id.clone(),
            started_at,
            completed_at: Utc::now(),
            phases: work.phases,
            theories: self
                .theories
                .iter()
                .filter(|t| work.new_theories.contains(&t.id))
                .cloned()
                .collect(),
            agent_actions: turns,
            challenges: work.challenges,
            experiments: work.experiments,
            observations: work.observations,
            experiment_failures: work.experiment_failures,
            discussions: work.discussions,
            discoveries: work.discoveries,
            consensus,
        };

        info!(
            cycle = number,
            theories = record.theories.len(),
            challenges = record.challenges.len(),
            experiments = record.experiments.len(),
            discoveries = record.discoveries.len(),
            consensus = %record.consensus.summary_line(),
            "Cycle completed"
        );
        self.events.publish(DiscoveryEvent::CycleCompleted {
            session_id,
            cycle: number,
            theories: record.theories.len(),
            challenges: record.challenges.len(),
            experiments: record.experiments.len(),
            discussions: record.discussions.len(),
            discoveries: record.discoveries.len(),
            consensus: record.consensus.clone(),
        });

        if let Some(session) = self.sessions.last_mut() {
            session.cycles.push(record.clone());
        }
        Ok(record)
    }

    fn build_context(&self, cycle: u64, topic: &str) -> ThinkContext {
        let skip_theories = self.theories.len().saturating_sub(self.config.recent_theories);
        let skip_discoveries = self
            .discoveries
            .len()
            .saturating_sub(self.config.recent_discoveries);
        ThinkContext {
            cycle,
            topic: topic.to_string(),
            language: self.language,
            recent_theories: self
                .theories
                .iter()
                .skip(skip_theories)
                .map(|t| TheoryBrief {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    author: t.proposed_by.agent_name.clone(),
                    status: t.status.to_string(),
                    support: t.support.len(),
                })
                .collect(),
            recent_discoveries: self
                .discoveries
                .iter()
                .skip(skip_discoveries)
                .map(|d| d.description.clone())
                .collect(),
            peer_messages: self.peer_messages.clone(),
            available_experiments: self.facade.catalog(),
            observation_categories: self.facade.observation_categories(),
        }
    }

    fn agent_index(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.id() == agent_id)
    }

    fn find_theory_mut(&mut self, reference: &str) -> Option<&mut Theory> {
        let idx = resolve_theory(&self.theories, reference)?;
        self.theories.get_mut(idx)
    }

    fn extract_theories(&mut self, turns: &[AgentTurn], cycle: u64, work: &mut CycleWork) {
        for turn in turns.iter().filter(|t| t.result.success) {
            for draft in turn.result.proposed_theories() {
                let theory = Theory::from_draft(draft, turn.agent.clone(), cycle);
                if let Some(idx) = self.agent_index(&turn.agent.agent_id) {
                    self.agents[idx].record_hypothesis(&theory.name);
                }
                info!(
                    theory_id = %theory.id,
                    name = %theory.name,
                    agent = %turn.agent.agent_name,
                    "Theory proposed"
                );
                self.events.publish(DiscoveryEvent::TheoryProposed {
                    theory: theory.clone(),
                });
                work.new_theories.push(theory.id.clone());
                self.theories.push(theory);
            }
        }
    }

    fn apply_support(&mut self, turns: &[AgentTurn], cycle: u64) {
        for turn in turns.iter().filter(|t| t.result.success) {
            for action in &turn.result.actions {
                let AgentAction::SupportTheory { theory_id, reason } = action else {
                    continue;
                };
                let Some(theory) = self.find_theory_mut(theory_id) else {
                    debug!(agent = %turn.agent.agent_name, %theory_id, "Support for unknown theory ignored");
                    continue;
                };
                if theory.add_support(turn.agent.clone(), reason.clone(), cycle) {
                    let event = DiscoveryEvent::TheorySupported {
                        theory_id: theory.id.clone(),
                        theory_name: theory.name.clone(),
                        supporter: turn.agent.clone(),
                        support_count: theory.support.len(),
                    };
                    self.events.publish(event);
                }
            }
        }
    }

    async fn challenge_theories(&mut self, turns: &[AgentTurn], work: &mut CycleWork) {
        if let Some(skeptic) = self.agents.iter().position(|a| a.is_skeptic()) {
            let challenger = agent_ref(&self.agents[skeptic]);
            for theory_id in work.new_theories.clone() {
                let Some((message, author)) = self
                    .theories
                    .iter()
                    .find(|t| t.id == theory_id)
                    .map(|t| {
                        (
                            challenge_message(
                                &t.name,
                                &t.description,
                                t.mathematics.as_deref(),
                                &t.predictions,
                            ),
                            t.proposed_by.agent_name.clone(),
                        )
                    })
                else {
                    continue;
                };

                let result = self.agents[skeptic]
                    .respond(&message, &author, self.language)
                    .await;
                if !result.success {
                    warn!(%theory_id, error = ?result.error, "Skeptic challenge failed");
                    self.events.publish(DiscoveryEvent::AgentError {
                        agent: challenger.clone(),
                        error: result.error.unwrap_or(result.thinking),
                    });
                    continue;
                }
                let challenge = Challenge::new(&theory_id, challenger.clone(), &result);
                self.attach_challenge(challenge, work);
            }
        }

        // Challenges raised by other agents through actions.
        for turn in turns.iter().filter(|t| t.result.success) {
            for action in &turn.result.actions {
                let AgentAction::ChallengeTheory {
                    theory_id,
                    objections,
                    alternative_explanation,
                } = action
                else {
                    continue;
                };
                let Some(id) = resolve_theory(&self.theories, theory_id)
                    .map(|idx| self.theories[idx].id.clone())
                else {
                    debug!(%theory_id, "Challenge of unknown theory ignored");
                    continue;
                };
                let challenge = Challenge::from_objections(
                    &id,
                    turn.agent.clone(),
                    &objections.join("; "),
                    alternative_explanation.as_deref(),
                    turn.result.agreement,
                );
                self.attach_challenge(challenge, work);
            }
        }
    }

    fn attach_challenge(&mut self, challenge: Challenge, work: &mut CycleWork) {
        let Some(theory) = self.theories.iter_mut().find(|t| t.id == challenge.theory_id) else {
            return;
        };
        info!(theory_id = %theory.id, challenger = %challenge.challenger.agent_name, "Theory challenged");
        self.events.publish(DiscoveryEvent::TheoryChallenged {
            theory_id: theory.id.clone(),
            theory_name: theory.name.clone(),
            challenge: challenge.clone(),
        });
        theory.challenges.push(challenge.clone());
        work.challenges.push(challenge);
    }

    fn execute_experiments(&mut self, turns: &[AgentTurn], work: &mut CycleWork) {
        let tolerance = self.config.prediction_tolerance;
        for turn in turns.iter().filter(|t| t.result.success) {
            for action in &turn.result.actions {
                match action {
                    AgentAction::RunExperiment(request) => {
                        self.events.publish(DiscoveryEvent::ExperimentRunning {
                            experiment: request.experiment.clone(),
                            requested_by: turn.agent.clone(),
                        });
                        let mut record = match self.facade.run(&request.experiment, &request.parameters) {
                            Ok(record) => record,
                            Err(e) => {
                                self.report_experiment_failure(&turn.agent, &request.experiment, &e, work);
                                continue;
                            }
                        };
                        record.requested_by = Some(turn.agent.agent_name.clone());

                        let mut linked = None;
                        if let Some(reference) = &request.theory_id {
                            if let Some(theory) = self.find_theory_mut(reference) {
                                let supports = record.matches_prediction(&request.expected, tolerance);
                                theory.experiments.push(ExperimentLink {
                                    experiment_id: record.id.clone(),
                                    experiment: record.experiment.clone(),
                                    supports,
                                });
                                linked = Some((theory.id.clone(), supports));
                            }
                        }

                        info!(
                            experiment = %record.experiment,
                            agent = %turn.agent.agent_name,
                            theory = ?linked,
                            "Experiment completed"
                        );
                        self.events.publish(DiscoveryEvent::ExperimentCompleted {
                            record: record.clone(),
                            theory_id: linked.as_ref().map(|(id, _)| id.clone()),
                            supports: linked.map(|(_, supports)| supports),
                        });
                        self.experiments.push(record.clone());
                        work.experiments.push(record);
                    }
                    AgentAction::ObserveData { data_category } => {
                        match self.facade.observe(data_category) {
                            Ok(observation) => {
                                self.events.publish(DiscoveryEvent::ObservationRecorded {
                                    observation: observation.clone(),
                                    requested_by: turn.agent.clone(),
                                });
                                work.observations.push(observation);
                            }
                            Err(e) => self.report_experiment_failure(&turn.agent, data_category, &e, work),
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn report_experiment_failure(
        &self,
        requested_by: &AgentRef,
        experiment: &str,
        error: &ExperimentError,
        work: &mut CycleWork,
    ) {
        warn!(%experiment, agent = %requested_by.agent_name, %error, "Experiment failed");
        self.events.publish(DiscoveryEvent::ExperimentError {
            experiment: experiment.to_string(),
            requested_by: requested_by.clone(),
            error: error.to_string(),
        });
        work.experiment_failures.push(ExperimentFailure {
            requested_by: requested_by.clone(),
            experiment: experiment.to_string(),
            error: error.to_string(),
        });
    }

    async fn run_discussions(&mut self, turns: &[AgentTurn], cycle: u64, work: &mut CycleWork) {
        for turn in turns.iter().filter(|t| t.result.success) {
            let Some(initiator) = self.agent_index(&turn.agent.agent_id) else {
                continue;
            };
            for action in &turn.result.actions {
                if let AgentAction::RequestDiscussion {
                    topic,
                    question,
                    relevant_agents,
                } = action
                {
                    let question = question.as_deref().unwrap_or(topic);
                    let discussion = self
                        .facilitate_discussion(
                            DiscussionKind::Requested,
                            initiator,
                            topic,
                            question,
                            relevant_agents,
                            self.config.discussion_participants,
                            Some(cycle),
                        )
                        .await;
                    work.discussions.push(discussion);
                }
            }
            if let Some(message) = turn
                .result
                .message_to_others
                .as_deref()
                .filter(|m| !m.trim().is_empty())
            {
                let discussion = self
                    .facilitate_discussion(
                        DiscussionKind::Broadcast,
                        initiator,
                        message,
                        message,
                        &[],
                        self.config.broadcast_responders,
                        Some(cycle),
                    )
                    .await;
                work.discussions.push(discussion);
            }
        }
    }

    /// Pick participants and collect one reply from each, in turn.
    ///
    /// Agents named in `requested` (by key or display name) are used when
    /// present; otherwise peers are ranked by topical relevance.
    #[allow(clippy::too_many_arguments)]
    async fn facilitate_discussion(
        &mut self,
        kind: DiscussionKind,
        initiator: usize,
        topic: &str,
        question: &str,
        requested: &[String],
        limit: usize,
        cycle: Option<u64>,
    ) -> Discussion {
        let mut participants: Vec<usize> = Vec::new();
        for name in requested {
            let found = self.agents.iter().position(|a| {
                a.key().eq_ignore_ascii_case(name) || a.name().eq_ignore_ascii_case(name)
            });
            if let Some(idx) = found.filter(|i| *i != initiator && !participants.contains(i)) {
                participants.push(idx);
            }
        }
        participants.truncate(limit);
        if participants.is_empty() {
            let candidates: Vec<(usize, &Persona)> = self
                .agents
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != initiator)
                .map(|(i, a)| (i, a.persona().as_ref()))
                .collect();
            participants = self.selector.select(topic, &candidates, limit);
        }

        let initiator_ref = agent_ref(&self.agents[initiator]);
        let mut discussion = Discussion::new(kind, topic, question, initiator_ref.clone(), cycle);
        info!(
            discussion_id = %discussion.id,
            ?kind,
            initiator = %initiator_ref.agent_name,
            participants = participants.len(),
            "Discussion opened"
        );
        self.events.publish(DiscoveryEvent::Discussion {
            discussion_id: discussion.id.clone(),
            kind,
            topic: topic.to_string(),
            question: question.to_string(),
            initiator: initiator_ref.clone(),
            participants: participants.iter().map(|i| agent_ref(&self.agents[*i])).collect(),
        });

        let prompt = match kind {
            DiscussionKind::Requested => format!("Discussion topic: {topic}\n\n{question}"),
            DiscussionKind::Broadcast => question.to_string(),
        };
        for idx in participants {
            let result = self.agents[idx]
                .respond(&prompt, &initiator_ref.agent_name, self.language)
                .await;
            let agent = &self.agents[idx];
            let message = DiscussionMessage {
                agent: agent_ref(agent),
                role: agent.role(),
                content: result.reply_text().to_string(),
                agreement: result.agreement,
                success: result.success,
                timestamp: Utc::now(),
            };
            if !result.success {
                self.events.publish(DiscoveryEvent::AgentError {
                    agent: message.agent.clone(),
                    error: result.error.clone().unwrap_or_default(),
                });
            } else if agent.role() == Role::Synthesizer {
                discussion.conclusions.push(message.content.clone());
            }
            self.events.publish(DiscoveryEvent::DiscussionMessage {
                discussion_id: discussion.id.clone(),
                message: message.clone(),
            });
            discussion.messages.push(message);
        }

        self.events.publish(DiscoveryEvent::DiscussionCompleted {
            discussion_id: discussion.id.clone(),
            messages: discussion.messages.len(),
            mean_agreement: discussion.mean_agreement(),
        });
        self.discussions.push(discussion.clone());
        discussion
    }

    /// Validate every proposed theory that has enough supporters and at
    /// least one supporting experiment. Validated theories are never
    /// re-evaluated, so repeated calls add nothing new.
    pub fn check_discoveries(&mut self) -> Vec<Discovery> {
        let min_supporters = self.config.min_supporters;
        let cycle = (self.cycle_count > 0).then_some(self.cycle_count);
        let mut found = Vec::new();

        for theory in self
            .theories
            .iter_mut()
            .filter(|t| t.status == TheoryStatus::Proposed)
        {
            if theory.support.len() < min_supporters || !theory.has_experimental_support() {
                continue;
            }
            if !theory.validate() {
                continue;
            }
            let discovery = Discovery::validated(theory, cycle, None);
            info!(
                theory_id = %theory.id,
                name = %theory.name,
                supporters = theory.support.len(),
                "Theory validated"
            );
            found.push(discovery);
        }

        for discovery in &found {
            self.credit(discovery);
        }
        found
    }

    fn record_connections(&mut self, turns: &[AgentTurn], cycle: u64) -> Vec<Discovery> {
        let found: Vec<Discovery> = turns
            .iter()
            .filter(|t| t.result.success)
            .flat_map(|turn| {
                turn.result.actions.iter().filter_map(move |action| match action {
                    AgentAction::RecordDiscovery { discovery } if !discovery.trim().is_empty() => {
                        Some(Discovery::connection(discovery, turn.agent.clone(), cycle))
                    }
                    _ => None,
                })
            })
            .collect();
        for discovery in &found {
            self.credit(discovery);
        }
        found
    }

    /// Append a discovery, credit its agents and announce it.
    fn credit(&mut self, discovery: &Discovery) {
        for by in &discovery.discovered_by {
            if let Some(idx) = self.agent_index(&by.agent_id) {
                self.agents[idx].record_discovery(&discovery.id);
            }
        }
        info!(discovery_id = %discovery.id, kind = %discovery.kind, "Discovery recorded");
        self.events.publish(DiscoveryEvent::Discovery {
            discovery: discovery.clone(),
        });
        self.discoveries.push(discovery.clone());
    }

    // ── Single-shot flows ────────────────────────────────────────────

    /// Run every agent once on `topic` and apply the supermajority rule.
    ///
    /// Independent of sessions and cycles. When consensus is reached the
    /// highest-agreement theory is recorded as validated.
    pub async fn explore_topic(&mut self, topic: &str) -> Result<ExplorationReport, DeliberationError> {
        if self.agents.is_empty() {
            return Err(DeliberationError::NoAgents);
        }
        let topic = topic.trim();
        let topic = if topic.is_empty() {
            self.config.default_topic.clone()
        } else {
            topic.to_string()
        };
        info!(%topic, agents = self.agents.len(), "Exploration started");
        self.events.publish(DiscoveryEvent::ExplorationStarted {
            topic: topic.clone(),
            agents: self.agents.len(),
        });

        let context = self.build_context(self.cycle_count, &topic);
        let events = Arc::clone(&self.events);
        let results = think_all(self.agents.iter_mut(), &context, &events, true).await;

        let tally = self.rule.tally(&results);
        let best = self
            .rule
            .best_theory(&results)
            .map(|(turn, draft)| (turn.agent.clone(), draft.clone()));
        info!(%topic, tally = %tally.summary_line(), best = ?best.as_ref().map(|(_, d)| &d.name), "Exploration tallied");
        self.events.publish(DiscoveryEvent::ExplorationCompleted {
            topic: topic.clone(),
            tally: tally.clone(),
        });

        let mut discovery = None;
        if tally.reached {
            self.events.publish(DiscoveryEvent::ConsensusReached {
                topic: topic.clone(),
                tally: tally.clone(),
                theory: best.as_ref().map(|(_, d)| d.name.clone()),
            });
            if let Some((author, draft)) = &best {
                let mut theory = Theory::from_draft(draft, author.clone(), self.cycle_count);
                theory.validate();
                if let Some(idx) = self.agent_index(&author.agent_id) {
                    self.agents[idx].record_hypothesis(&theory.name);
                }
                let found = Discovery::validated(
                    &theory,
                    (self.cycle_count > 0).then_some(self.cycle_count),
                    Some(tally.consensus_percent),
                );
                self.theories.push(theory);
                self.credit(&found);
                discovery = Some(found);
            }
        }

        Ok(ExplorationReport {
            topic,
            results,
            best_theory: best.map(|(_, d)| d.name),
            tally,
            discovery,
            timestamp: Utc::now(),
        })
    }

    /// Ask one agent a question directly, outside the cycle protocol.
    pub async fn query_agent(&mut self, key: &str, question: &str) -> Result<AgentResult, DeliberationError> {
        let idx = self
            .agents
            .iter()
            .position(|a| a.key() == key || a.id() == key)
            .ok_or_else(|| DeliberationError::UnknownAgent(key.to_string()))?;

        let result = self.agents[idx]
            .respond(question, HUMAN_OBSERVER, self.language)
            .await;
        let agent = agent_ref(&self.agents[idx]);
        if !result.success {
            self.events.publish(DiscoveryEvent::AgentError {
                agent: agent.clone(),
                error: result.error.clone().unwrap_or_default(),
            });
        }
        self.events.publish(DiscoveryEvent::AgentResponse {
            agent,
            from: HUMAN_OBSERVER.to_string(),
            question: question.to_string(),
            result: result.clone(),
        });
        Ok(result)
    }

    /// Run an experiment on behalf of a human observer.
    pub fn run_experiment(
        &mut self,
        experiment: &str,
        parameters: &serde_json::Value,
    ) -> Result<ExperimentRecord, DeliberationError> {
        let observer = observer_ref();
        self.events.publish(DiscoveryEvent::ExperimentRunning {
            experiment: experiment.to_string(),
            requested_by: observer.clone(),
        });
        let mut record = match self.facade.run(experiment, parameters) {
            Ok(record) => record,
            Err(e) => {
                self.events.publish(DiscoveryEvent::ExperimentError {
                    experiment: experiment.to_string(),
                    requested_by: observer,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };
        record.requested_by = Some(observer.agent_name);
        self.events.publish(DiscoveryEvent::ExperimentCompleted {
            record: record.clone(),
            theory_id: None,
            supports: None,
        });
        self.experiments.push(record.clone());
        Ok(record)
    }

    // ── Read side ────────────────────────────────────────────────────

    pub fn state(&self) -> OrchestratorState {
        OrchestratorState {
            running: self.is_running(),
            cycle_count: self.cycle_count,
            language: self.language,
            session: self.current_session().map(Session::summary),
            agents: self.agents.iter().map(Agent::summary).collect(),
            theory_count: self.theories.len(),
            validated_theories: self
                .theories
                .iter()
                .filter(|t| t.status == TheoryStatus::Validated)
                .count(),
            discovery_count: self.discoveries.len(),
            discussion_count: self.discussions.len(),
            experiment_count: self.experiments.len(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_session().is_some()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.sessions.last().filter(|s| s.is_active())
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn theories(&self) -> &[Theory] {
        &self.theories
    }

    pub fn discussions(&self) -> &[Discussion] {
        &self.discussions
    }

    pub fn discoveries(&self) -> &[Discovery] {
        &self.discoveries
    }

    pub fn experiments(&self) -> &[ExperimentRecord] {
        &self.experiments
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::experiment::{MockExperimentFacade, ToyWorld};
    use crate::gateway::{RetryPolicy, ScriptedBackend};
    use crate::persona::Roster;
    use serde_json::json;

    fn reply(agreement: u8, extra: serde_json::Value) -> String {
        let mut envelope = json!({"thinking": "considered", "agreement": agreement});
        if let (Some(target), Some(extra)) = (envelope.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        envelope.to_string()
    }

    fn orchestrator(backend: ScriptedBackend, facade: Box<dyn ExperimentFacade>) -> Orchestrator {
        let registry = PersonaRegistry::builtin(Roster::Legends);
        let gateways = GatewaySet::uniform(Arc::new(backend), RetryPolicy::default());
        let config = DeliberationConfig {
            selection_seed: Some(1),
            ..DeliberationConfig::default()
        };
        Orchestrator::from_registry(
            &registry,
            &gateways,
            AgentSettings::default(),
            facade,
            EventBus::new().shared(),
            config,
        )
        .unwrap()
    }

    fn toy() -> Box<dyn ExperimentFacade> {
        Box::new(ToyWorld::new())
    }

    #[tokio::test]
    async fn test_cycle_without_session_is_rejected() {
        let mut orch = orchestrator(ScriptedBackend::offline(), toy());
        let err = orch.run_cycle().await.unwrap_err();
        assert!(matches!(err, DeliberationError::NoActiveSession));
        assert_eq!(orch.cycle_count(), 0);
        assert!(orch.events().recent(10).is_empty());
    }

    #[tokio::test]
    async fn test_starting_a_session_closes_the_previous_one() {
        let mut orch = orchestrator(ScriptedBackend::offline(), toy());
        let first = orch.start_session(Some("Gravity"), None);
        let second = orch.start_session(Some("Light"), Some(Language::Es));

        assert_eq!(orch.sessions().len(), 2);
        assert!(!orch.sessions()[0].is_active());
        assert_eq!(orch.current_session().unwrap().id, second.id);
        assert_ne!(first.id, second.id);
        assert_eq!(orch.language(), Language::Es);

        let types: Vec<&str> = orch.events().recent(10).iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec!["session_started", "session_ended", "language_changed", "session_started"]
        );
        orch.stop_session().unwrap();
        assert!(matches!(orch.stop_session(), Err(DeliberationError::NoActiveSession)));
    }

    #[tokio::test]
    async fn test_skeptic_does_not_think_in_cycles() {
        let backend = ScriptedBackend::new(BackendKind::DeepSeek).otherwise(reply(80, json!({})));
        let mut orch = orchestrator(backend, toy());
        orch.start_session(None, None);

        let record = orch.run_cycle().await.unwrap();
        assert_eq!(record.agent_actions.len(), 9);
        assert!(record.agent_actions.iter().all(|t| !t.role.is_skeptic()));
        assert_eq!(record.phases, CyclePhase::ORDER.to_vec());
        assert_eq!(record.consensus.voting, 9);
        assert_eq!(orch.current_session().unwrap().cycles.len(), 1);
    }

    #[tokio::test]
    async fn test_experiment_failure_is_contained() {
        let mut facade = MockExperimentFacade::new();
        facade.expect_catalog().returning(Vec::new);
        facade.expect_observation_categories().returning(Vec::new);
        facade
            .expect_run()
            .returning(|id, _| Err(ExperimentError::UnknownExperiment(id.to_string())));

        let backend = ScriptedBackend::new(BackendKind::DeepSeek)
            .when(
                "You are Isaac Newton",
                reply(90, json!({"actions": [{"type": "RUN_EXPERIMENT", "params": {"experiment": "warp_drive"}}]})),
            )
            .otherwise(reply(80, json!({})));
        let mut orch = orchestrator(backend, Box::new(facade));
        orch.start_session(None, None);

        let record = orch.run_cycle().await.unwrap();
        assert!(record.experiments.is_empty());
        assert_eq!(record.experiment_failures.len(), 1);
        assert_eq!(record.experiment_failures[0].error, "Unknown experiment: warp_drive");
        assert_eq!(orch.events().stats().events_by_type["experiment_error"], 1);
        assert_eq!(record.phases.len(), 6);
    }

    #[tokio::test]
    async fn test_query_agent() {
        let backend = ScriptedBackend::new(BackendKind::DeepSeek)
            .otherwise(r#"{"thinking": "t", "response": "F = ma", "agreement": 90}"#);
        let mut orch = orchestrator(backend, toy());

        let result = orch.query_agent("newton", "What moves the planets?").await.unwrap();
        assert_eq!(result.reply_text(), "F = ma");
        assert!(matches!(
            orch.query_agent("galileo", "?").await,
            Err(DeliberationError::UnknownAgent(key)) if key == "galileo"
        ));
        let last = orch.events().recent(1);
        assert_eq!(last[0].event_type(), "agent_response");
    }

    #[tokio::test]
    async fn test_check_discoveries_is_idempotent() {
        let mut orch = orchestrator(ScriptedBackend::offline(), toy());
        let author = agent_ref(&orch.agents()[0]);
        let mut theory = Theory::from_draft(
            &crate::agent::TheoryDraft {
                name: "Isochronism".into(),
                description: "Period is independent of amplitude".into(),
                mathematics: None,
                predictions: vec![],
                tests: vec![],
            },
            author,
            1,
        );
        for agent in &orch.agents()[1..4] {
            theory.add_support(agent_ref(agent), None, 1);
        }
        theory.experiments.push(ExperimentLink {
            experiment_id: "e1".into(),
            experiment: "pendulum".into(),
            supports: true,
        });
        orch.theories.push(theory);

        assert_eq!(orch.check_discoveries().len(), 1);
        assert!(orch.check_discoveries().is_empty());
        assert_eq!(orch.discoveries().len(), 1);
        assert_eq!(orch.theories()[0].status, TheoryStatus::Validated);
    }

    #[tokio::test]
    async fn test_support_by_name_goes_to_latest_proposed_theory() {
        let backend = ScriptedBackend::new(BackendKind::DeepSeek)
            .when(
                "You are Albert Einstein",
                reply(85, json!({"actions": [{"type": "SUPPORT_THEORY", "params": {"theory_id": "isochronism"}}]})),
            )
            .otherwise(reply(80, json!({})));
        let mut orch = orchestrator(backend, toy());
        let newton = orch
            .agents()
            .iter()
            .find(|a| a.key() == "newton")
            .map(agent_ref)
            .unwrap();
        let draft = crate::agent::TheoryDraft {
            name: "Isochronism".into(),
            description: "Period is independent of amplitude".into(),
            mathematics: None,
            predictions: vec![],
            tests: vec![],
        };
        let mut settled = Theory::from_draft(&draft, newton.clone(), 1);
        settled.validate();
        orch.theories.push(settled);
        orch.theories.push(Theory::from_draft(&draft, newton, 2));

        orch.start_session(None, None);
        orch.run_cycle().await.unwrap();

        assert!(orch.theories()[0].support.is_empty());
        assert_eq!(orch.theories()[1].support.len(), 1);
        assert_eq!(orch.theories()[1].support[0].supporter.agent_key, "einstein");
    }

    #[tokio::test]
    async fn test_run_experiment_for_observer() {
        let mut orch = orchestrator(ScriptedBackend::offline(), toy());
        let record = orch
            .run_experiment("pendulum", &json!({"length": 2.0}))
            .unwrap();
        assert_eq!(record.requested_by.as_deref(), Some(HUMAN_OBSERVER));
        assert_eq!(orch.experiments().len(), 1);
        assert!(matches!(
            orch.run_experiment("tachyon", &json!({})),
            Err(DeliberationError::Experiment(ExperimentError::UnknownExperiment(_)))
        ));
    }

    #[tokio::test]
    async fn test_state_snapshot() {
        let mut orch = orchestrator(ScriptedBackend::offline(), toy());
        orch.start_session(Some("Entropy"), None);
        let state = orch.state();
        assert!(state.running);
        assert_eq!(state.agents.len(), 10);
        assert_eq!(state.session.unwrap().topic, "Entropy");
        assert_eq!(state.cycle_count, 0);
    }
}
