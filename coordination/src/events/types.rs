//! Event types for deliberation observers
//!
//! Every phase boundary of a cycle, every exploration and every session
//! transition is mirrored as one of these events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentResult, Language};
use crate::deliberation::consensus::ConsensusTally;
use crate::deliberation::records::{
    AgentRef, Challenge, Discovery, DiscussionKind, DiscussionMessage, Theory,
};
use crate::experiment::{ExperimentRecord, Observation};

/// All deliberation events. Serialized as `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    SessionStarted {
        session_id: String,
        topic: String,
        language: Language,
    },

    SessionEnded {
        session_id: String,
        topic: String,
        cycles: usize,
        duration_ms: i64,
        reason: SessionEndReason,
    },

    LanguageChanged {
        language: Language,
    },

    CycleStarted {
        session_id: String,
        cycle: u64,
        topic: String,
    },

    /// An agent began its independent think call.
    AgentThinking {
        agent: AgentRef,
        cycle: u64,
    },

    /// An agent finished thinking successfully.
    AgentThought {
        agent: AgentRef,
        thinking: String,
        agreement: u8,
        #[serde(default)]
        focus: Option<String>,
        #[serde(default)]
        theory: Option<String>,
        actions: usize,
    },

    /// An agent call failed after retries.
    AgentError {
        agent: AgentRef,
        error: String,
    },

    /// Reply to a direct query from outside the cycle protocol.
    AgentResponse {
        agent: AgentRef,
        from: String,
        question: String,
        result: AgentResult,
    },

    TheoryProposed {
        theory: Theory,
    },

    TheoryChallenged {
        theory_id: String,
        theory_name: String,
        challenge: Challenge,
    },

    TheorySupported {
        theory_id: String,
        theory_name: String,
        supporter: AgentRef,
        support_count: usize,
    },

    ExperimentRunning {
        experiment: String,
        requested_by: AgentRef,
    },

    ExperimentCompleted {
        record: ExperimentRecord,
        #[serde(default)]
        theory_id: Option<String>,
        #[serde(default)]
        supports: Option<bool>,
    },

    ExperimentError {
        experiment: String,
        requested_by: AgentRef,
        error: String,
    },

    ObservationRecorded {
        observation: Observation,
        requested_by: AgentRef,
    },

    /// A discussion opened with its selected participants.
    Discussion {
        discussion_id: String,
        kind: DiscussionKind,
        topic: String,
        question: String,
        initiator: AgentRef,
        participants: Vec<AgentRef>,
    },

    DiscussionMessage {
        discussion_id: String,
        message: DiscussionMessage,
    },

    DiscussionCompleted {
        discussion_id: String,
        messages: usize,
        #[serde(default)]
        mean_agreement: Option<f64>,
    },

    Discovery {
        discovery: Discovery,
    },

    CycleCompleted {
        session_id: String,
        cycle: u64,
        theories: usize,
        challenges: usize,
        experiments: usize,
        discussions: usize,
        discoveries: usize,
        consensus: ConsensusTally,
    },

    ExplorationStarted {
        topic: String,
        agents: usize,
    },

    /// Tally of a single-shot exploration, reached or not.
    ExplorationCompleted {
        topic: String,
        tally: ConsensusTally,
    },

    ConsensusReached {
        topic: String,
        tally: ConsensusTally,
        #[serde(default)]
        theory: Option<String>,
    },

    AutoCycleStarted {
        interval_ms: u64,
    },

    AutoCycleStopped {
        cycles_run: u64,
    },
}

impl DiscoveryEvent {
    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::SessionEnded { .. } => "session_ended",
            Self::LanguageChanged { .. } => "language_changed",
            Self::CycleStarted { .. } => "cycle_started",
            Self::AgentThinking { .. } => "agent_thinking",
            Self::AgentThought { .. } => "agent_thought",
            Self::AgentError { .. } => "agent_error",
            Self::AgentResponse { .. } => "agent_response",
            Self::TheoryProposed { .. } => "theory_proposed",
            Self::TheoryChallenged { .. } => "theory_challenged",
            Self::TheorySupported { .. } => "theory_supported",
            Self::ExperimentRunning { .. } => "experiment_running",
            Self::ExperimentCompleted { .. } => "experiment_completed",
            Self::ExperimentError { .. } => "experiment_error",
            Self::ObservationRecorded { .. } => "observation_recorded",
            Self::Discussion { .. } => "discussion",
            Self::DiscussionMessage { .. } => "discussion_message",
            Self::DiscussionCompleted { .. } => "discussion_completed",
            Self::Discovery { .. } => "discovery",
            Self::CycleCompleted { .. } => "cycle_completed",
            Self::ExplorationStarted { .. } => "exploration_started",
            Self::ExplorationCompleted { .. } => "exploration_completed",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::AutoCycleStarted { .. } => "auto_cycle_started",
            Self::AutoCycleStopped { .. } => "auto_cycle_stopped",
        }
    }

    /// Session ID if the event is scoped to one
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::SessionEnded { session_id, .. }
            | Self::CycleStarted { session_id, .. }
            | Self::CycleCompleted { session_id, .. } => Some(session_id),
            _ => None,
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::AgentError { .. } | Self::ExperimentError { .. })
    }
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic per-bus sequence number, starting at 1.
    pub seq: u64,
    #[serde(flatten)]
    pub event: DiscoveryEvent,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Reason a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Explicit stop request
    Stopped,
    /// A new session was started while this one was active
    Replaced,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Replaced => write!(f, "replaced"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = EventEnvelope {
            seq: 7,
            event: DiscoveryEvent::CycleStarted {
                session_id: "s1".to_string(),
                cycle: 2,
                topic: "Dark matter".to_string(),
            },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "cycle_started");
        assert_eq!(json["data"]["cycle"], 2);
        assert_eq!(json["data"]["topic"], "Dark matter");
        assert!(json["timestamp"].is_string());

        let back: EventEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_event_accessors() {
        let event = DiscoveryEvent::SessionEnded {
            session_id: "s1".to_string(),
            topic: "t".to_string(),
            cycles: 3,
            duration_ms: 1200,
            reason: SessionEndReason::Replaced,
        };
        assert_eq!(event.event_type(), "session_ended");
        assert_eq!(event.session_id(), Some("s1"));
        assert!(!event.is_error());

        let error = DiscoveryEvent::AgentError {
            agent: AgentRef {
                agent_id: "id".to_string(),
                agent_key: "bohr".to_string(),
                agent_name: "Bohr".to_string(),
            },
            error: "timeout".to_string(),
        };
        assert!(error.is_error());
        assert_eq!(error.session_id(), None);
    }

    #[test]
    fn test_unit_like_payload_serializes() {
        let json = serde_json::to_value(DiscoveryEvent::AutoCycleStopped { cycles_run: 4 }).unwrap();
        assert_eq!(json["type"], "auto_cycle_stopped");
        assert_eq!(json["data"]["cycles_run"], 4);
    }
}
