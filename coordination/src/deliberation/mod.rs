//! Deliberation — sessions, the cycle protocol and consensus
//!
//! # Cycle protocol
//!
//! ```text
//! ┌─────────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │ 1. Independent      │──▶│ 2. Theory        │──▶│ 3. Skeptic       │
//! │    thinking (join)  │   │    extraction    │   │    challenge     │
//! └─────────────────────┘   └──────────────────┘   └────────┬─────────┘
//!                                                           │
//! ┌─────────────────────┐   ┌──────────────────┐   ┌────────▼─────────┐
//! │ 6. Discovery check  │◀──│ 5. Discussion    │◀──│ 4. Experiment    │
//! │   (support + data)  │   │   (relevant peers│   │    execution     │
//! └─────────────────────┘   └──────────────────┘   └──────────────────┘
//! ```
//!
//! Each phase finishes before the next starts. Within a cycle a theory is
//! validated by accumulated support plus a matching experiment; the
//! single-shot [`Orchestrator::explore_topic`] uses the supermajority
//! [`ConsensusRule`] instead. The two rules never mix.

pub mod consensus;
pub mod orchestrator;
pub mod records;
pub mod selection;

pub use consensus::{ConsensusRule, ConsensusTally};
pub use orchestrator::{
    DeliberationError, ExplorationReport, Orchestrator, OrchestratorState, HUMAN_OBSERVER,
};
pub use records::{
    AgentRef, AgentTurn, Challenge, CyclePhase, CycleRecord, Discovery, DiscoveryKind,
    Discussion, DiscussionKind, DiscussionMessage, ExperimentFailure, ExperimentLink, Session,
    SessionSummary, SupportRecord, Theory, TheoryStatus,
};
pub use selection::PeerSelector;
