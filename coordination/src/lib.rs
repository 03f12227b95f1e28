//! Physics Discovery Coordination Library
//!
//! This library provides:
//! - A persona registry of physicist archetypes with role protocols
//!   (standard, tenth-man skeptic, synthesizer)
//! - A model gateway with per-attempt deadlines and bounded retry over
//!   DeepSeek, Anthropic and OpenAI backends
//! - Agents that turn model replies into structured, always-valid results
//! - A deliberation orchestrator running the six-phase cycle protocol and
//!   the single-shot supermajority exploration
//! - An event bus mirroring every phase boundary to observers
//!
//! # Usage
//!
//! ```ignore
//! use coordination::{DiscoveryConfig, EventBus, Orchestrator, ToyWorld};
//!
//! let config = DiscoveryConfig::default();
//! let registry = config.load_personas()?;
//! let gateways = config.build_gateways(&Default::default());
//! let mut orchestrator = Orchestrator::from_registry(
//!     &registry,
//!     &gateways,
//!     config.agent_settings(),
//!     Box::new(ToyWorld::new()),
//!     EventBus::new().shared(),
//!     config.deliberation.clone(),
//! )?;
//!
//! orchestrator.start_session(Some("Dark matter"), None);
//! let cycle = orchestrator.run_cycle().await?;
//! println!("{}", cycle.consensus.summary_line());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agent;
pub mod config;
pub mod deliberation;
pub mod events;
pub mod experiment;
pub mod gateway;
pub mod persona;

// Re-export key persona types
pub use persona::{Persona, PersonaError, PersonaRegistry, Role, RoleProtocol, Roster};

// Re-export key gateway types
pub use gateway::{
    BackendKind, ChatMessage, ChatRequest, ChatResponse, GatewayError, GatewaySet,
    GenerationParams, ModelBackend, ModelGateway, RetryPolicy, ScriptedBackend,
};

// Re-export key agent types
pub use agent::{
    Agent, AgentAction, AgentResult, AgentSettings, AgentSummary, InvocationState, Language,
    ResultOutcome, TheoryDraft, ThinkContext,
};

// Re-export experiment types
pub use experiment::{
    ExperimentError, ExperimentFacade, ExperimentRecord, ExperimentSpec, Observation, ToyWorld,
};

// Re-export key event types
pub use events::{
    DiscoveryEvent, EventBus, EventEnvelope, EventFilter, SessionEndReason, SharedEventBus,
};

// Re-export deliberation types
pub use deliberation::{
    ConsensusRule, ConsensusTally, CyclePhase, CycleRecord, DeliberationError, Discovery,
    DiscoveryKind, Discussion, ExplorationReport, Orchestrator, OrchestratorState, Session,
    Theory, TheoryStatus,
};

// Re-export configuration types
pub use config::{ConfigError, DiscoveryConfig};
