//! Scripted deliberation integration test — exercises the full cycle
//! protocol with deterministic backends (no LLM calls).
//!
//! Covers: persona registry ↔ gateway ↔ agents ↔ orchestrator ↔ toy
//! experiments ↔ event bus running together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use coordination::deliberation::DiscussionKind;
use coordination::{
    Agent, AgentSettings, BackendKind, ChatRequest, CyclePhase, DeliberationError, DiscoveryEvent,
    DiscoveryKind, EventBus, ModelGateway, Orchestrator, PersonaRegistry, ResultOutcome,
    RetryPolicy, Role, Roster, ScriptedBackend, TheoryStatus, ToyWorld,
};
use coordination::config::DeliberationConfig;
use coordination::gateway::GatewaySet;

const SKEPTIC: &str = "You are Advocatus Diaboli";

/// Helper: display name from the identity line of the system prompt.
fn speaker(request: &ChatRequest) -> String {
    request
        .system_prompt()
        .and_then(|s| s.lines().find(|l| l.starts_with("You are ")))
        .map(|l| {
            l.trim_start_matches("You are ")
                .split(',')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default()
}

/// Helper: a valid reply envelope with extra top-level fields merged in.
fn envelope(agreement: u8, extra: serde_json::Value) -> String {
    let mut value = json!({"thinking": "Weighing the evidence", "agreement": agreement});
    if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        target.extend(extra.clone());
    }
    value.to_string()
}

fn skeptic_reply() -> String {
    envelope(
        10,
        json!({"response": "Untested at high energies; consider the Michelson-Morley precedent."}),
    )
}

fn orchestrator(backend: ScriptedBackend) -> Orchestrator {
    orchestrator_with(backend, DeliberationConfig::default())
}

fn orchestrator_with(backend: ScriptedBackend, config: DeliberationConfig) -> Orchestrator {
    let registry = PersonaRegistry::builtin(Roster::Legends);
    let gateways = GatewaySet::uniform(Arc::new(backend), RetryPolicy::default());
    Orchestrator::from_registry(
        &registry,
        &gateways,
        AgentSettings::default(),
        Box::new(ToyWorld::new()),
        EventBus::new().shared(),
        DeliberationConfig {
            selection_seed: Some(7),
            ..config
        },
    )
    .unwrap()
}

fn event_types(orch: &Orchestrator) -> Vec<&'static str> {
    orch.events()
        .recent(500)
        .iter()
        .map(|e| e.event_type())
        .collect()
}

// ── Full council, one cycle ────────────────────────────────────────

#[tokio::test]
async fn test_every_standard_agent_proposes_and_skeptic_challenges_each() {
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .otherwise_with(|request| {
            let name = speaker(request);
            Ok(envelope(
                100,
                json!({"theory": {
                    "name": format!("{name}'s conjecture"),
                    "description": format!("What {name} believes"),
                    "predictions": ["A measurable deviation"]
                }}),
            ))
        });
    let mut orch = orchestrator(backend);
    orch.start_session(Some("Quantum gravity"), None);

    let cycle = orch.run_cycle().await.unwrap();

    assert_eq!(cycle.number, 1);
    assert_eq!(cycle.agent_actions.len(), 9);
    assert_eq!(cycle.theories.len(), 9);
    assert_eq!(cycle.challenges.len(), 9);
    assert!(cycle
        .challenges
        .iter()
        .all(|c| c.challenger.agent_name == "Advocatus Diaboli" && c.agreement == 10));
    for theory in &cycle.theories {
        assert_eq!(theory.status, TheoryStatus::Proposed);
        assert_eq!(theory.challenges.len(), 1);
        assert_eq!(theory.name, format!("{}'s conjecture", theory.proposed_by.agent_name));
    }

    assert_eq!(cycle.consensus.voting, 9);
    assert_eq!(cycle.consensus.consensus_percent, 100.0);
    assert!(cycle.consensus.reached);
    // Agreement alone never validates a theory inside a cycle.
    assert!(cycle.discoveries.is_empty());
    assert_eq!(orch.state().validated_theories, 0);
}

#[tokio::test]
async fn test_phases_and_events_follow_protocol_order() {
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .when(
            "You are Isaac Newton",
            envelope(
                90,
                json!({
                    "theory": {"name": "Universal gravitation", "description": "Inverse square attraction"},
                    "actions": [{"type": "RUN_EXPERIMENT", "params": {"experiment": "projectile", "parameters": {"velocity": 10.0}}}],
                    "message_to_others": "Does gravity act instantaneously?"
                }),
            ),
        )
        .otherwise(envelope(80, json!({"response": "Worth testing."})));
    let mut orch = orchestrator(backend);
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();
    assert_eq!(cycle.phases, CyclePhase::ORDER.to_vec());

    let types = event_types(&orch);
    let first = |name: &str| types.iter().position(|t| *t == name).unwrap();
    let last = |name: &str| types.iter().rposition(|t| *t == name).unwrap();

    assert_eq!(types[0], "session_started");
    assert_eq!(types[1], "cycle_started");
    assert!(last("agent_thinking") < first("agent_thought"));
    assert!(last("agent_thought") < first("theory_proposed"));
    assert!(first("theory_proposed") < first("theory_challenged"));
    assert!(first("theory_challenged") < first("experiment_running"));
    assert!(first("experiment_completed") < first("discussion"));
    assert!(last("discussion_completed") < first("cycle_completed"));
    assert_eq!(*types.last().unwrap(), "cycle_completed");
}

// ── Cross-cycle support accumulation ───────────────────────────────

#[tokio::test]
async fn test_support_and_matching_experiment_validate_theory_in_later_cycle() {
    let second_round = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&second_round);

    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .otherwise_with(move |request| {
            let name = speaker(request);
            let later = flag.load(Ordering::SeqCst);
            let reply = match name.as_str() {
                "Isaac Newton" if !later => envelope(
                    95,
                    json!({"theory": {
                        "name": "Isochronism",
                        "description": "A pendulum's period depends only on its length",
                        "mathematics": "T = 2*pi*sqrt(L/g)",
                        "predictions": ["T = 2.0 s for L = 1 m"],
                        "tests": ["Time a 1 m pendulum"]
                    }}),
                ),
                "Isaac Newton" => envelope(
                    95,
                    json!({"actions": [{"type": "RUN_EXPERIMENT", "params": {
                        "experiment": "pendulum",
                        "parameters": {"length": 1.0},
                        "theory_id": "Isochronism",
                        "expected": {"period": 2.0}
                    }}]}),
                ),
                "Albert Einstein" | "Richard Feynman" | "Paul Dirac" if later => envelope(
                    85,
                    json!({"actions": [{"type": "SUPPORT_THEORY", "params": {
                        "theory_id": "isochronism",
                        "reason": "Matches the small-angle limit"
                    }}]}),
                ),
                _ => envelope(75, json!({})),
            };
            Ok(reply)
        });
    let mut orch = orchestrator(backend);
    orch.start_session(Some("Oscillations"), None);

    let first = orch.run_cycle().await.unwrap();
    assert_eq!(first.theories.len(), 1);
    assert!(first.discoveries.is_empty());

    second_round.store(true, Ordering::SeqCst);
    let second = orch.run_cycle().await.unwrap();

    assert!(second.theories.is_empty());
    assert_eq!(second.experiments.len(), 1);
    assert_eq!(second.discoveries.len(), 1);
    let discovery = &second.discoveries[0];
    assert_eq!(discovery.kind, DiscoveryKind::ValidatedTheory);
    assert_eq!(discovery.cycle, Some(2));

    let theory = &orch.theories()[0];
    assert_eq!(theory.status, TheoryStatus::Validated);
    assert_eq!(theory.support.len(), 3);
    assert!(theory.support.iter().all(|s| s.cycle == 2));
    assert!(theory.has_experimental_support());
    assert_eq!(theory.mathematics.as_deref(), Some("T = 2*pi*sqrt(L/g)"));
    assert_eq!(theory.tests, vec!["Time a 1 m pendulum"]);

    // Validated theories are not re-evaluated.
    assert!(orch.check_discoveries().is_empty());
    assert_eq!(orch.discoveries().len(), 1);
    assert_eq!(orch.current_session().unwrap().cycles.len(), 2);
}

#[tokio::test]
async fn test_missed_prediction_does_not_validate() {
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .otherwise_with(|request| {
            let reply = match speaker(request).as_str() {
                "Isaac Newton" => envelope(
                    95,
                    json!({
                        "theory": {"name": "Long pendulum", "description": "Period doubles"},
                        "actions": [{"type": "RUN_EXPERIMENT", "params": {
                            "experiment": "pendulum",
                            "parameters": {"length": 1.0},
                            "theory_id": "Long pendulum",
                            "expected": {"period": 4.0}
                        }}]
                    }),
                ),
                _ => envelope(
                    85,
                    json!({"actions": [{"type": "SUPPORT_THEORY", "params": {"theory_id": "Long pendulum"}}]}),
                ),
            };
            Ok(reply)
        });
    let mut orch = orchestrator(backend);
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();
    let theory = &orch.theories()[0];
    assert_eq!(theory.support.len(), 8);
    assert_eq!(theory.experiments.len(), 1);
    assert!(!theory.experiments[0].supports);
    assert!(cycle.discoveries.is_empty());

    let completed = orch
        .events()
        .recent(500)
        .into_iter()
        .find_map(|e| match e.event {
            DiscoveryEvent::ExperimentCompleted { supports, .. } => Some(supports),
            _ => None,
        });
    assert_eq!(completed, Some(Some(false)));
}

// ── Failure containment ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_backend_timeout_yields_failed_result_and_cycle_completes() {
    let registry = PersonaRegistry::builtin(Roster::Legends);
    let fast = Arc::new(ModelGateway::new(Arc::new(
        ScriptedBackend::new(BackendKind::DeepSeek)
            .when(SKEPTIC, skeptic_reply())
            .otherwise(envelope(90, json!({}))),
    )));
    let stalled = Arc::new(ModelGateway::new(Arc::new(
        ScriptedBackend::new(BackendKind::DeepSeek)
            .otherwise(envelope(90, json!({})))
            .with_delay(Duration::from_secs(600)),
    )));
    let agents: Vec<Agent> = registry
        .iter()
        .map(|persona| {
            let gateway = if persona.key == "feynman" { &stalled } else { &fast };
            Agent::new(Arc::clone(persona), Arc::clone(gateway), AgentSettings::default())
        })
        .collect();
    let mut orch = Orchestrator::new(
        agents,
        Box::new(ToyWorld::new()),
        EventBus::new().shared(),
        DeliberationConfig::default(),
    )
    .unwrap();
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();

    assert_eq!(cycle.agent_actions.len(), 9);
    let feynman = cycle
        .agent_actions
        .iter()
        .find(|t| t.agent.agent_key == "feynman")
        .unwrap();
    assert!(!feynman.result.success);
    assert_eq!(feynman.result.agreement, 0);
    assert_eq!(feynman.result.outcome, ResultOutcome::Failed);
    assert!(feynman.result.error.as_deref().unwrap().contains("timed out"));

    assert_eq!(cycle.consensus.successful, 8);
    assert_eq!(cycle.consensus.voting, 8);
    assert!(cycle.consensus.reached);
    assert_eq!(cycle.phases.len(), 6);
    assert!(event_types(&orch).contains(&"agent_error"));
}

#[tokio::test]
async fn test_malformed_reply_degrades_instead_of_failing() {
    let raw = "I refuse to answer in JSON. Gravity is curvature.";
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .when("You are Niels Bohr", raw)
        .otherwise(envelope(80, json!({})));
    let mut orch = orchestrator(backend);
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();
    let bohr = cycle
        .agent_actions
        .iter()
        .find(|t| t.agent.agent_key == "bohr")
        .unwrap();
    assert!(bohr.result.success);
    assert_eq!(bohr.result.outcome, ResultOutcome::Degraded);
    assert_eq!(bohr.result.thinking, raw);
    assert_eq!(
        bohr.result.agreement,
        Role::Standard.protocol().fallback_agreement
    );
    assert!(bohr.result.actions.is_empty());
}

#[tokio::test]
async fn test_unknown_experiment_emits_error_event_and_cycle_continues() {
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .when(
            "You are Stephen Hawking",
            envelope(
                88,
                json!({"actions": [
                    {"type": "RUN_EXPERIMENT", "params": {"experiment": "black_hole_evaporation"}},
                    {"type": "OBSERVE_DATA", "params": {"data_category": "cmb"}},
                    {"type": "RUN_EXPERIMENT", "params": {"experiment": "pendulum", "parameters": {"length": -1.0}}}
                ]}),
            ),
        )
        .otherwise(envelope(80, json!({})));
    let mut orch = orchestrator(backend);
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();

    assert_eq!(cycle.experiment_failures.len(), 2);
    assert_eq!(
        cycle.experiment_failures[0].error,
        "Unknown experiment: black_hole_evaporation"
    );
    assert_eq!(cycle.observations.len(), 1);
    assert_eq!(cycle.observations[0].category, "cmb");
    assert!(cycle.experiments.is_empty());
    assert_eq!(cycle.phases.len(), 6);

    let stats = orch.events().stats();
    assert_eq!(stats.events_by_type["experiment_error"], 2);
    assert_eq!(stats.events_by_type["cycle_completed"], 1);
}

#[tokio::test]
async fn test_cycle_without_session_changes_nothing() {
    let mut orch = orchestrator(ScriptedBackend::offline());
    orch.start_session(Some("Light"), None);
    orch.stop_session().unwrap();

    let before = orch.events().stats().total_events;
    let err = orch.run_cycle().await.unwrap_err();
    assert!(matches!(err, DeliberationError::NoActiveSession));
    assert_eq!(err.to_string(), "No active session");
    assert_eq!(orch.cycle_count(), 0);
    assert_eq!(orch.events().stats().total_events, before);
}

// ── Discussions ────────────────────────────────────────────────────

#[tokio::test]
async fn test_broadcast_and_requested_discussions() {
    let backend = ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, skeptic_reply())
        .when(
            "You are Emmy Noether",
            envelope(
                90,
                json!({
                    "message_to_others": "Every continuous symmetry hides a conservation law.",
                    "actions": [{"type": "REQUEST_DISCUSSION", "params": {
                        "topic": "Time-translation symmetry",
                        "question": "Is energy conserved in an expanding universe?",
                        "relevant_agents": ["hawking", "Albert Einstein", "noether"]
                    }}]
                }),
            ),
        )
        .otherwise(envelope(70, json!({"response": "Interesting, let me think."})));
    let backend = Arc::new(backend);
    let registry = PersonaRegistry::builtin(Roster::Legends);
    let gateways = GatewaySet::uniform(backend.clone(), RetryPolicy::default());
    let mut orch = Orchestrator::from_registry(
        &registry,
        &gateways,
        AgentSettings::default(),
        Box::new(ToyWorld::new()),
        EventBus::new().shared(),
        DeliberationConfig {
            selection_seed: Some(7),
            ..DeliberationConfig::default()
        },
    )
    .unwrap();
    orch.start_session(None, None);

    let cycle = orch.run_cycle().await.unwrap();
    assert_eq!(cycle.discussions.len(), 2);

    let requested = &cycle.discussions[0];
    assert_eq!(requested.kind, DiscussionKind::Requested);
    assert_eq!(requested.initiator.agent_key, "noether");
    let keys: Vec<&str> = requested
        .messages
        .iter()
        .map(|m| m.agent.agent_key.as_str())
        .collect();
    assert_eq!(keys, vec!["hawking", "einstein"]);

    let broadcast = &cycle.discussions[1];
    assert_eq!(broadcast.kind, DiscussionKind::Broadcast);
    assert_eq!(broadcast.messages.len(), 3);
    assert!(broadcast
        .messages
        .iter()
        .all(|m| m.agent.agent_key != "noether" && m.success));

    // Peer messages are carried into the next round's context.
    orch.run_cycle().await.unwrap();
    let newton_think_prompts: Vec<String> = backend
        .calls()
        .iter()
        .filter(|r| speaker(r) == "Isaac Newton")
        .filter_map(|r| r.last_user_message())
        .filter(|m| m.contains("Current context:"))
        .map(str::to_string)
        .collect();
    assert_eq!(newton_think_prompts.len(), 2);
    assert!(!newton_think_prompts[0].contains("Every continuous symmetry"));
    assert!(newton_think_prompts[1].contains("Every continuous symmetry"));
}

// ── Single-shot supermajority exploration ──────────────────────────

fn exploration_backend(holdout: Option<&'static str>) -> ScriptedBackend {
    ScriptedBackend::new(BackendKind::DeepSeek)
        .when(SKEPTIC, envelope(5, json!({})))
        .otherwise_with(move |request| {
            let name = speaker(request);
            let agreement = if Some(name.as_str()) == holdout { 40 } else { 90 };
            let extra = if name == "Paul Dirac" {
                json!({"theory": {"name": "Antimatter symmetry", "description": "Every particle has a mirror"}})
            } else {
                json!({})
            };
            Ok(envelope(agreement, extra))
        })
}

#[tokio::test]
async fn test_eight_of_nine_is_not_a_discovery() {
    let mut orch = orchestrator(exploration_backend(Some("John A. Wheeler")));
    let report = orch.explore_topic("Matter-antimatter asymmetry").await.unwrap();

    assert_eq!(report.results.len(), 10);
    assert_eq!(report.tally.voting, 9);
    assert_eq!(report.tally.agreeing, 8);
    assert!((report.tally.consensus_percent - 800.0 / 9.0).abs() < 1e-9);
    assert!(!report.tally.reached);
    assert_eq!(report.tally.skeptic_agreement, Some(5));
    assert!(report.discovery.is_none());
    assert_eq!(report.best_theory.as_deref(), Some("Antimatter symmetry"));
    assert!(orch.discoveries().is_empty());
    assert!(!event_types(&orch).contains(&"consensus_reached"));
}

#[tokio::test]
async fn test_nine_of_nine_records_consensus_discovery() {
    let mut orch = orchestrator(exploration_backend(None));
    let report = orch.explore_topic("Matter-antimatter asymmetry").await.unwrap();

    assert_eq!(report.tally.consensus_percent, 100.0);
    assert!(report.tally.reached);
    let discovery = report.discovery.unwrap();
    assert_eq!(discovery.kind, DiscoveryKind::ValidatedTheory);
    assert_eq!(discovery.consensus_percent, Some(100.0));
    let theory = discovery.theory.unwrap();
    assert_eq!(theory.name, "Antimatter symmetry");
    assert_eq!(theory.status, TheoryStatus::Validated);
    assert_eq!(theory.proposed_by.agent_key, "dirac");

    // Exploration does not need or create a session.
    assert!(orch.sessions().is_empty());
    assert_eq!(orch.discoveries().len(), 1);
    assert!(event_types(&orch).contains(&"consensus_reached"));
}
