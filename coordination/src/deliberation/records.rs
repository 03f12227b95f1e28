//! Deliberation records: sessions, cycles, theories, challenges,
//! discussions and discoveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::consensus::ConsensusTally;
use crate::agent::{AgentResult, Language, TheoryDraft};
use crate::experiment::{ExperimentRecord, Observation};
use crate::persona::Role;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Phase of the six-step cycle protocol, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    IndependentThinking,
    TheoryExtraction,
    SkepticChallenge,
    ExperimentExecution,
    Discussion,
    DiscoveryCheck,
}

impl CyclePhase {
    pub const ORDER: [CyclePhase; 6] = [
        Self::IndependentThinking,
        Self::TheoryExtraction,
        Self::SkepticChallenge,
        Self::ExperimentExecution,
        Self::Discussion,
        Self::DiscoveryCheck,
    ];

    /// Phase that must follow this one, if any.
    pub fn next(&self) -> Option<CyclePhase> {
        let idx = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndependentThinking => write!(f, "independent_thinking"),
            Self::TheoryExtraction => write!(f, "theory_extraction"),
            Self::SkepticChallenge => write!(f, "skeptic_challenge"),
            Self::ExperimentExecution => write!(f, "experiment_execution"),
            Self::Discussion => write!(f, "discussion"),
            Self::DiscoveryCheck => write!(f, "discovery_check"),
        }
    }
}

/// Lifecycle of a theory. `Proposed -> Validated` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TheoryStatus {
    Proposed,
    Validated,
}

impl TheoryStatus {
    pub fn can_transition_to(&self, next: TheoryStatus) -> bool {
        matches!((self, next), (Self::Proposed, Self::Validated))
    }
}

impl std::fmt::Display for TheoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Validated => write!(f, "validated"),
        }
    }
}

/// Reference to the agent behind a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub agent_id: String,
    pub agent_key: String,
    pub agent_name: String,
}

/// The skeptic's critique of a theory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub theory_id: String,
    pub challenger: AgentRef,
    pub challenge: String,
    pub reasoning: String,
    pub agreement: u8,
    pub timestamp: DateTime<Utc>,
}

impl Challenge {
    pub fn new(theory_id: &str, challenger: AgentRef, result: &AgentResult) -> Self {
        Self {
            id: new_id(),
            theory_id: theory_id.to_string(),
            challenger,
            challenge: result.reply_text().to_string(),
            reasoning: result.thinking.clone(),
            agreement: result.agreement,
            timestamp: Utc::now(),
        }
    }

    /// Challenge raised through a `CHALLENGE_THEORY` action.
    pub fn from_objections(
        theory_id: &str,
        challenger: AgentRef,
        objections: &str,
        alternative: Option<&str>,
        agreement: u8,
    ) -> Self {
        Self {
            id: new_id(),
            theory_id: theory_id.to_string(),
            challenger,
            challenge: objections.to_string(),
            reasoning: alternative.unwrap_or_default().to_string(),
            agreement,
            timestamp: Utc::now(),
        }
    }
}

/// An agent backing a theory it did not author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportRecord {
    pub supporter: AgentRef,
    #[serde(default)]
    pub reason: Option<String>,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
}

/// An experiment run against a theory's prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLink {
    pub experiment_id: String,
    pub experiment: String,
    pub supports: bool,
}

/// A proposed explanatory unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theory {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mathematics: Option<String>,
    pub predictions: Vec<String>,
    pub tests: Vec<String>,
    pub proposed_by: AgentRef,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub status: TheoryStatus,
    pub challenges: Vec<Challenge>,
    pub support: Vec<SupportRecord>,
    pub experiments: Vec<ExperimentLink>,
}

impl Theory {
    pub fn from_draft(draft: &TheoryDraft, proposed_by: AgentRef, cycle: u64) -> Self {
        Self {
            id: new_id(),
            name: draft.name.clone(),
            description: draft.description.clone(),
            mathematics: draft.mathematics.clone(),
            predictions: draft.predictions.clone(),
            tests: draft.tests.clone(),
            proposed_by,
            cycle,
            timestamp: Utc::now(),
            status: TheoryStatus::Proposed,
            challenges: Vec::new(),
            support: Vec::new(),
            experiments: Vec::new(),
        }
    }

    /// Add support from `supporter` unless it authored the theory or
    /// already supports it. Returns whether support was added.
    pub fn add_support(&mut self, supporter: AgentRef, reason: Option<String>, cycle: u64) -> bool {
        if supporter.agent_id == self.proposed_by.agent_id
            || self
                .support
                .iter()
                .any(|s| s.supporter.agent_id == supporter.agent_id)
        {
            return false;
        }
        self.support.push(SupportRecord {
            supporter,
            reason,
            cycle,
            timestamp: Utc::now(),
        });
        true
    }

    pub fn has_experimental_support(&self) -> bool {
        self.experiments.iter().any(|e| e.supports)
    }

    /// Whether `reference` names this theory by id or, case-insensitively, by name.
    pub fn is_referenced_by(&self, reference: &str) -> bool {
        self.id == reference || self.name.eq_ignore_ascii_case(reference.trim())
    }

    pub fn validate(&mut self) -> bool {
        if !self.status.can_transition_to(TheoryStatus::Validated) {
            return false;
        }
        self.status = TheoryStatus::Validated;
        true
    }
}

/// Resolve a theory reference to an index into `theories`.
///
/// An exact id wins. A name resolves to the most recent proposed theory
/// with that name, then to the most recent of any status.
pub fn resolve_theory(theories: &[Theory], reference: &str) -> Option<usize> {
    if let Some(idx) = theories.iter().position(|t| t.id == reference) {
        return Some(idx);
    }
    theories
        .iter()
        .rposition(|t| t.status == TheoryStatus::Proposed && t.is_referenced_by(reference))
        .or_else(|| theories.iter().rposition(|t| t.is_referenced_by(reference)))
}

/// Origin of a discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionKind {
    /// Explicit `REQUEST_DISCUSSION` action.
    Requested,
    /// `message_to_others` broadcast.
    Broadcast,
}

/// One contribution to a discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionMessage {
    pub agent: AgentRef,
    pub role: Role,
    pub content: String,
    pub agreement: u8,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// A multi-party exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    pub kind: DiscussionKind,
    pub topic: String,
    pub question: String,
    pub initiator: AgentRef,
    pub messages: Vec<DiscussionMessage>,
    pub conclusions: Vec<String>,
    pub cycle: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl Discussion {
    pub fn new(
        kind: DiscussionKind,
        topic: &str,
        question: &str,
        initiator: AgentRef,
        cycle: Option<u64>,
    ) -> Self {
        Self {
            id: new_id(),
            kind,
            topic: topic.to_string(),
            question: question.to_string(),
            initiator,
            messages: Vec::new(),
            conclusions: Vec::new(),
            cycle,
            timestamp: Utc::now(),
        }
    }

    /// Mean agreement across successful replies, if any.
    pub fn mean_agreement(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .messages
            .iter()
            .filter(|m| m.success)
            .map(|m| m.agreement as f64)
            .collect();
        (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    ValidatedTheory,
    Connection,
}

impl std::fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidatedTheory => write!(f, "validated_theory"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

/// Append-only record of something the council found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: String,
    pub kind: DiscoveryKind,
    pub description: String,
    /// Snapshot of the theory at validation time.
    #[serde(default)]
    pub theory: Option<Theory>,
    pub discovered_by: Vec<AgentRef>,
    #[serde(default)]
    pub cycle: Option<u64>,
    /// Set when the discovery came from a supermajority vote.
    #[serde(default)]
    pub consensus_percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Discovery {
    pub fn validated(theory: &Theory, cycle: Option<u64>, consensus_percent: Option<f64>) -> Self {
        let mut discovered_by = vec![theory.proposed_by.clone()];
        discovered_by.extend(theory.support.iter().map(|s| s.supporter.clone()));
        Self {
            id: new_id(),
            kind: DiscoveryKind::ValidatedTheory,
            description: format!("{}: {}", theory.name, theory.description),
            theory: Some(theory.clone()),
            discovered_by,
            cycle,
            consensus_percent,
            timestamp: Utc::now(),
        }
    }

    pub fn connection(description: &str, by: AgentRef, cycle: u64) -> Self {
        Self {
            id: new_id(),
            kind: DiscoveryKind::Connection,
            description: description.to_string(),
            theory: None,
            discovered_by: vec![by],
            cycle: Some(cycle),
            consensus_percent: None,
            timestamp: Utc::now(),
        }
    }
}

/// One agent's phase-1 (or exploration) output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTurn {
    pub agent: AgentRef,
    pub role: Role,
    pub result: AgentResult,
}

/// An experiment or observation request that could not be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentFailure {
    pub requested_by: AgentRef,
    pub experiment: String,
    pub error: String,
}

/// Everything one pass of the protocol produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub number: u64,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Phases in the order they completed.
    pub phases: Vec<CyclePhase>,
    pub agent_actions: Vec<AgentTurn>,
    /// Theories as they stood when the cycle ended.
    pub theories: Vec<Theory>,
    pub challenges: Vec<Challenge>,
    pub experiments: Vec<ExperimentRecord>,
    pub observations: Vec<Observation>,
    pub experiment_failures: Vec<ExperimentFailure>,
    pub discussions: Vec<Discussion>,
    pub discoveries: Vec<Discovery>,
    /// Informational tally over the phase-1 results.
    pub consensus: ConsensusTally,
}

/// A bounded sequence of cycles under one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub topic: String,
    pub language: Language,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cycles: Vec<CycleRecord>,
}

impl Session {
    pub fn new(topic: &str, language: Language) -> Self {
        Self {
            id: new_id(),
            topic: topic.to_string(),
            language,
            started_at: Utc::now(),
            ended_at: None,
            cycles: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            topic: self.topic.clone(),
            language: self.language,
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self
                .ended_at
                .map(|end| (end - self.started_at).num_milliseconds()),
            cycle_count: self.cycles.len(),
        }
    }
}

/// Session header without its cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub topic: String,
    pub language: Language,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub cycle_count: usize,
}
