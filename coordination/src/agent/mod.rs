//! Agent — one persona bound to one model gateway
//!
//! An agent turns a structured context into prompts, calls its gateway and
//! interprets the reply. Every call returns an [`AgentResult`]; backend
//! failures and malformed replies are outcomes, not errors.
//!
//! # Invocation lifecycle
//!
//! ```text
//! Idle ──▶ Prompting ──▶ AwaitingBackend ──┬──▶ Parsing ──┬──▶ ResultOk
//!                                          │              └──▶ ResultDegraded
//!                                          └──────────────────▶ ResultFailed
//! ```

pub mod action;
pub mod parse;
pub mod prompt;

pub use action::{AgentAction, ExperimentAction, TheoryDraft};
pub use parse::{parse_reply, Envelope, ParsedReply};
pub use prompt::Language;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::experiment::ExperimentSpec;
use crate::gateway::{BackendKind, ChatMessage, ChatRequest, GenerationParams, ModelGateway};
use crate::persona::{Persona, Role};

/// Stage of a single think/respond invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Idle,
    Prompting,
    AwaitingBackend,
    Parsing,
    ResultOk,
    ResultDegraded,
    ResultFailed,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ResultOk | Self::ResultDegraded | Self::ResultFailed
        )
    }

    /// States reachable from this one.
    pub fn valid_transitions(&self) -> &'static [InvocationState] {
        match self {
            Self::Idle | Self::ResultOk | Self::ResultDegraded | Self::ResultFailed => {
                &[Self::Prompting]
            }
            Self::Prompting => &[Self::AwaitingBackend],
            Self::AwaitingBackend => &[Self::Parsing, Self::ResultFailed],
            Self::Parsing => &[Self::ResultOk, Self::ResultDegraded],
        }
    }

    pub fn can_transition_to(&self, next: InvocationState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Prompting => write!(f, "prompting"),
            Self::AwaitingBackend => write!(f, "awaiting_backend"),
            Self::Parsing => write!(f, "parsing"),
            Self::ResultOk => write!(f, "result_ok"),
            Self::ResultDegraded => write!(f, "result_degraded"),
            Self::ResultFailed => write!(f, "result_failed"),
        }
    }
}

/// Terminal classification of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    /// Reply validated against the envelope.
    Ok,
    /// Reply was not a valid envelope; raw text kept as thinking.
    Degraded,
    /// Backend call failed after retries.
    Failed,
}

impl ResultOutcome {
    fn terminal_state(self) -> InvocationState {
        match self {
            Self::Ok => InvocationState::ResultOk,
            Self::Degraded => InvocationState::ResultDegraded,
            Self::Failed => InvocationState::ResultFailed,
        }
    }
}

/// Structured result of one think or respond call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub outcome: ResultOutcome,
    pub thinking: String,
    pub agreement: u8,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub theory: Option<TheoryDraft>,
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    /// Actions that could not be decoded, with the reason.
    #[serde(default)]
    pub rejected_actions: Vec<String>,
    #[serde(default)]
    pub message_to_others: Option<String>,
    /// Parser annotations such as agreement clamping.
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub latency_ms: u64,
}

impl AgentResult {
    /// Result for a backend failure.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            outcome: ResultOutcome::Failed,
            thinking: error.clone(),
            agreement: 0,
            focus: None,
            response: None,
            theory: None,
            actions: Vec::new(),
            rejected_actions: Vec::new(),
            message_to_others: None,
            notes: Vec::new(),
            error: Some(error),
            model: None,
            latency_ms: 0,
        }
    }

    /// Result for a reply that did not validate.
    pub fn degraded(raw: String, fallback_agreement: u8, reason: String) -> Self {
        Self {
            success: true,
            outcome: ResultOutcome::Degraded,
            response: Some(raw.clone()),
            thinking: raw,
            agreement: fallback_agreement,
            notes: vec![reason],
            error: None,
            ..Self::failed("")
        }
    }

    fn from_reply(reply: parse::StructuredReply) -> Self {
        Self {
            success: true,
            outcome: ResultOutcome::Ok,
            thinking: reply.thinking,
            agreement: reply.agreement,
            focus: reply.focus,
            response: reply.response,
            theory: reply.theory,
            actions: reply.actions,
            rejected_actions: reply.rejected_actions,
            message_to_others: reply.message_to_others,
            notes: reply.notes,
            error: None,
            model: None,
            latency_ms: 0,
        }
    }

    /// Theories proposed by this result: the top-level `theory` followed by
    /// any `PROPOSE_THEORY` actions with a different name.
    pub fn proposed_theories(&self) -> Vec<&TheoryDraft> {
        let mut drafts: Vec<&TheoryDraft> = self.theory.iter().collect();
        for action in &self.actions {
            if let AgentAction::ProposeTheory(draft) = action {
                if !drafts.iter().any(|d| d.name == draft.name) {
                    drafts.push(draft);
                }
            }
        }
        drafts
    }

    /// Text to show peers: the direct response if present, else the thinking.
    pub fn reply_text(&self) -> &str {
        self.response.as_deref().unwrap_or(&self.thinking)
    }
}

/// Summary of a theory as shown to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TheoryBrief {
    pub id: String,
    pub name: String,
    pub author: String,
    pub status: String,
    pub support: usize,
}

/// A message one agent addressed to the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub from: String,
    pub content: String,
}

/// Shared context handed to every agent in a think round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkContext {
    pub cycle: u64,
    pub topic: String,
    #[serde(skip)]
    pub language: Language,
    pub recent_theories: Vec<TheoryBrief>,
    pub recent_discoveries: Vec<String>,
    pub peer_messages: Vec<PeerMessage>,
    pub available_experiments: Vec<ExperimentSpec>,
    pub observation_categories: Vec<String>,
}

/// A message received from a peer and this agent's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub from: String,
    pub message: String,
    pub reply: String,
    pub agreement: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Think,
    Respond,
}

/// One entry of the observational think-log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkLogEntry {
    pub kind: InvocationKind,
    /// Topic for think calls, the incoming message for respond calls.
    pub input: String,
    pub result: AgentResult,
    pub timestamp: DateTime<Utc>,
}

/// Generation settings shared by all agents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub think_params: GenerationParams,
    pub respond_params: GenerationParams,
    /// Maximum think-log and interaction entries kept per agent.
    pub log_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            think_params: GenerationParams {
                temperature: 0.8,
                max_tokens: 4096,
            },
            respond_params: GenerationParams {
                temperature: 0.8,
                max_tokens: 2048,
            },
            log_limit: 50,
        }
    }
}

/// Read-only snapshot of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub key: String,
    pub name: String,
    pub role: Role,
    pub backend: BackendKind,
    pub personality: String,
    pub expertise: Vec<String>,
    pub current_focus: Option<String>,
    pub state: InvocationState,
    pub hypotheses_count: usize,
    pub discoveries_count: usize,
    pub interactions_count: usize,
    pub recent_thinking: Vec<ThinkLogEntry>,
}

/// Runtime actor for one persona.
pub struct Agent {
    id: String,
    persona: Arc<Persona>,
    gateway: Arc<ModelGateway>,
    settings: AgentSettings,
    state: InvocationState,
    current_focus: Option<String>,
    hypotheses: Vec<String>,
    discoveries: Vec<String>,
    interactions: VecDeque<Interaction>,
    think_log: VecDeque<ThinkLogEntry>,
}

impl Agent {
    pub fn new(persona: Arc<Persona>, gateway: Arc<ModelGateway>, settings: AgentSettings) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            persona,
            gateway,
            settings,
            state: InvocationState::Idle,
            current_focus: None,
            hypotheses: Vec::new(),
            discoveries: Vec::new(),
            interactions: VecDeque::new(),
            think_log: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn persona(&self) -> &Arc<Persona> {
        &self.persona
    }

    pub fn key(&self) -> &str {
        &self.persona.key
    }

    pub fn name(&self) -> &str {
        &self.persona.name
    }

    pub fn role(&self) -> Role {
        self.persona.role
    }

    pub fn is_skeptic(&self) -> bool {
        self.persona.is_skeptic()
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn think_log(&self) -> impl Iterator<Item = &ThinkLogEntry> {
        self.think_log.iter()
    }

    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    /// Independent reasoning over the shared context.
    pub async fn think(&mut self, context: &ThinkContext) -> AgentResult {
        self.transition(InvocationState::Prompting);
        let recent: Vec<&Interaction> = self.interactions.iter().rev().take(5).rev().collect();
        let user = prompt::think_prompt(&self.persona, context, &self.hypotheses, &recent);
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(prompt::system_prompt(&self.persona, context.language)),
                ChatMessage::user(user),
            ],
            self.settings.think_params,
        );

        let result = self.invoke(&request).await;
        if let Some(focus) = &result.focus {
            self.current_focus = Some(focus.clone());
        }
        self.log(InvocationKind::Think, context.topic.clone(), &result);
        result
    }

    /// Reply to a single message from `from`.
    pub async fn respond(&mut self, message: &str, from: &str, language: Language) -> AgentResult {
        self.transition(InvocationState::Prompting);
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(prompt::system_prompt(&self.persona, language)),
                ChatMessage::user(prompt::respond_prompt(&self.persona, message, from, language)),
            ],
            self.settings.respond_params,
        );

        let result = self.invoke(&request).await;
        if result.success {
            self.remember_interaction(Interaction {
                from: from.to_string(),
                message: message.to_string(),
                reply: result.reply_text().to_string(),
                agreement: result.agreement,
                timestamp: Utc::now(),
            });
        }
        self.log(InvocationKind::Respond, message.to_string(), &result);
        result
    }

    /// Note a theory this agent authored.
    pub fn record_hypothesis(&mut self, name: &str) {
        self.hypotheses.push(name.to_string());
    }

    /// Note a discovery this agent is credited with.
    pub fn record_discovery(&mut self, discovery_id: &str) {
        self.discoveries.push(discovery_id.to_string());
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.clone(),
            key: self.persona.key.clone(),
            name: self.persona.name.clone(),
            role: self.persona.role,
            backend: self.persona.backend,
            personality: self.persona.personality.clone(),
            expertise: self.persona.expertise.clone(),
            current_focus: self.current_focus.clone(),
            state: self.state,
            hypotheses_count: self.hypotheses.len(),
            discoveries_count: self.discoveries.len(),
            interactions_count: self.interactions.len(),
            recent_thinking: self.think_log.iter().rev().take(3).rev().cloned().collect(),
        }
    }

    async fn invoke(&mut self, request: &ChatRequest) -> AgentResult {
        self.transition(InvocationState::AwaitingBackend);
        let response = match self.gateway.generate(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(agent = %self.persona.name, error = %e, "Backend call failed");
                self.transition(InvocationState::ResultFailed);
                return AgentResult::failed(e.to_string());
            }
        };

        self.transition(InvocationState::Parsing);
        let mut result = match parse::parse_reply(&response.content) {
            ParsedReply::Structured(reply) => AgentResult::from_reply(reply),
            ParsedReply::Unparsed { raw, reason } => {
                debug!(agent = %self.persona.name, %reason, "Falling back to unparsed reply");
                AgentResult::degraded(raw, self.persona.role.protocol().fallback_agreement, reason)
            }
        };
        result.model = Some(response.model);
        result.latency_ms = response.latency_ms;

        self.transition(result.outcome.terminal_state());
        info!(
            agent = %self.persona.name,
            outcome = ?result.outcome,
            agreement = result.agreement,
            actions = result.actions.len(),
            "Agent invocation finished"
        );
        result
    }

    fn transition(&mut self, next: InvocationState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid invocation transition {} -> {}",
            self.state,
            next
        );
        debug!(agent = %self.persona.name, from = %self.state, to = %next, "Invocation state");
        self.state = next;
    }

    fn remember_interaction(&mut self, interaction: Interaction) {
        self.interactions.push_back(interaction);
        while self.interactions.len() > self.settings.log_limit {
            self.interactions.pop_front();
        }
    }

    fn log(&mut self, kind: InvocationKind, input: String, result: &AgentResult) {
        self.think_log.push_back(ThinkLogEntry {
            kind,
            input,
            result: result.clone(),
            timestamp: Utc::now(),
        });
        while self.think_log.len() > self.settings.log_limit {
            self.think_log.pop_front();
        }
    }
}
