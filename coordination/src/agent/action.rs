//! Typed actions an agent can request in its reply

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Accept a single value or a list of values as a list of strings.
///
/// Scalars are rendered as text; `null` entries and empty strings are dropped.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn text(value: serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(serde_json::Value::Array(items)) => items.into_iter().filter_map(text).collect(),
        Some(value) => text(value).into_iter().collect(),
    })
}

/// A theory as written by the proposing agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TheoryDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mathematics: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    #[schemars(with = "Vec<String>")]
    pub predictions: Vec<String>,
    /// Proposed tests.
    #[serde(default, alias = "experiments", deserialize_with = "one_or_many")]
    #[schemars(with = "Vec<String>")]
    pub tests: Vec<String>,
}

/// Parameters of a `RUN_EXPERIMENT` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAction {
    #[serde(alias = "experiment_name", alias = "experiment_id")]
    pub experiment: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Theory this run is meant to test, by id or name.
    #[serde(default, alias = "theory")]
    pub theory_id: Option<String>,
    /// Predicted numeric outcomes keyed by result field.
    #[serde(default)]
    pub expected: BTreeMap<String, f64>,
}

/// An action requested by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAction {
    RunExperiment(ExperimentAction),
    ObserveData {
        data_category: String,
    },
    ProposeTheory(TheoryDraft),
    ChallengeTheory {
        #[serde(alias = "theory")]
        theory_id: String,
        #[serde(default, deserialize_with = "one_or_many")]
        objections: Vec<String>,
        #[serde(default)]
        alternative_explanation: Option<String>,
    },
    SupportTheory {
        #[serde(alias = "theory")]
        theory_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    RequestDiscussion {
        topic: String,
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        relevant_agents: Vec<String>,
    },
    RecordDiscovery {
        discovery: String,
    },
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunExperiment(_) => "RUN_EXPERIMENT",
            Self::ObserveData { .. } => "OBSERVE_DATA",
            Self::ProposeTheory(_) => "PROPOSE_THEORY",
            Self::ChallengeTheory { .. } => "CHALLENGE_THEORY",
            Self::SupportTheory { .. } => "SUPPORT_THEORY",
            Self::RequestDiscussion { .. } => "REQUEST_DISCUSSION",
            Self::RecordDiscovery { .. } => "RECORD_DISCOVERY",
        }
    }

    /// Decode one raw action, describing why it was rejected on failure.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("<missing type>")
            .to_string();
        serde_json::from_value(value).map_err(|e| format!("Unknown or malformed action {kind}: {e}"))
    }
}

/// Prompt listing of every action an agent may request.
pub const ACTION_CATALOG: &[(&str, &str)] = &[
    ("RUN_EXPERIMENT", "{experiment, parameters, theory_id?, expected?} - Run a simulation"),
    ("OBSERVE_DATA", "{data_category} - Get observational data"),
    ("PROPOSE_THEORY", "{name, description, mathematics, predictions, tests}"),
    ("CHALLENGE_THEORY", "{theory_id, objections, alternative_explanation}"),
    ("SUPPORT_THEORY", "{theory_id, reason} - Back another agent's theory"),
    ("REQUEST_DISCUSSION", "{topic, question, relevant_agents}"),
    ("RECORD_DISCOVERY", "{discovery}"),
];
