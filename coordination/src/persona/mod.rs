//! Persona registry — immutable agent identities and role protocols
//!
//! A [`Persona`] is plain data: who the agent is, what it knows, which
//! backend serves it and which [`Role`] it plays. Everything role-specific
//! that ends up in a prompt is looked up once through [`Role::protocol`],
//! so the agent layer never branches on the role itself.

mod catalog;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::gateway::BackendKind;

/// Errors from building a persona registry.
#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("duplicate persona key: {0}")]
    DuplicateKey(String),

    #[error("at most one skeptic allowed, found {0}")]
    MultipleSkeptics(usize),

    #[error("persona registry is empty")]
    Empty,

    #[error("failed to read persona file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid persona file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown roster: {0}")]
    UnknownRoster(String),
}

/// Deliberation role of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Proposes and debates theories.
    #[default]
    Standard,
    /// Tenth man: must dissent from every theory.
    Skeptic,
    /// Connects the other agents' ideas into frameworks.
    Synthesizer,
}

impl Role {
    /// The prompt-level protocol for this role.
    pub fn protocol(self) -> &'static RoleProtocol {
        match self {
            Self::Standard => &STANDARD_PROTOCOL,
            Self::Skeptic => &SKEPTIC_PROTOCOL,
            Self::Synthesizer => &SYNTHESIZER_PROTOCOL,
        }
    }

    pub fn is_skeptic(self) -> bool {
        self == Self::Skeptic
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Skeptic => write!(f, "skeptic"),
            Self::Synthesizer => write!(f, "synthesizer"),
        }
    }
}

/// Role-specific prompt fragments and numeric conventions.
#[derive(Debug)]
pub struct RoleProtocol {
    /// Heading for the persona's special-duty rules, if the role has one.
    pub duty_heading: Option<&'static str>,
    /// Obligations appended after the duty rules.
    pub obligations: &'static [&'static str],
    /// Mission bullet describing the role's contribution.
    pub mission: &'static str,
    /// Closing question of a think prompt.
    pub think_question: &'static str,
    /// Reminder placed before a respond prompt.
    pub respond_reminder: Option<&'static str>,
    /// Advisory agreement band stated in the prompt.
    pub agreement_band: (u8, u8),
    /// Agreement assigned when a reply cannot be parsed.
    pub fallback_agreement: u8,
}

static STANDARD_PROTOCOL: RoleProtocol = RoleProtocol {
    duty_heading: None,
    obligations: &[],
    mission: "Collaborate with others while maintaining your unique perspective",
    think_question: "What theories could you propose?",
    respond_reminder: None,
    agreement_band: (60, 100),
    fallback_agreement: 75,
};

static SKEPTIC_PROTOCOL: RoleProtocol = RoleProtocol {
    duty_heading: Some("TENTH MAN PROTOCOL - YOUR SACRED DUTY:"),
    obligations: &[
        "Start by acknowledging the strength of the argument you're opposing",
        "Then systematically find flaws, gaps, and alternatives",
        "Propose what evidence would DISPROVE the theory",
        "Suggest alternative explanations",
        "Point out historical cases where similar confident theories were wrong",
    ],
    mission: "CHALLENGE every theory others propose",
    think_question: "What theories from others need to be challenged?",
    respond_reminder: Some(
        "REMEMBER YOUR TENTH MAN DUTY:\n\
         - You MUST find problems with whatever is being proposed\n\
         - Even if it seems brilliant, find the flaws\n\
         - Your job is to protect the group from overconfidence",
    ),
    agreement_band: (0, 40),
    fallback_agreement: 20,
};

static SYNTHESIZER_PROTOCOL: RoleProtocol = RoleProtocol {
    duty_heading: Some("SYNTHESIZER PROTOCOL - YOUR UNIQUE MISSION:"),
    obligations: &[
        "Consider ALL perspectives from other agents before concluding",
        "Look for hidden mathematical connections between theories",
        "Propose unified frameworks that reconcile apparent contradictions",
        "Create \"synthesis maps\" showing how different ideas connect",
        "Suggest how one agent's insight could solve another's problem",
    ],
    mission: "SYNTHESIZE and CONNECT ideas from all other agents",
    think_question:
        "What connections can you find between different ideas? What unified framework emerges?",
    respond_reminder: Some(
        "REMEMBER YOUR SYNTHESIZER DUTY:\n\
         - Look for connections between this and other agents' ideas\n\
         - Find the underlying unity in different perspectives\n\
         - Suggest how this could be integrated into a larger framework\n\
         - Identify common mathematical structures or concepts",
    ),
    agreement_band: (60, 100),
    fallback_agreement: 75,
};

/// Immutable agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Registry key, e.g. `euler`.
    pub key: String,
    pub name: String,
    /// Era or origin tag.
    #[serde(default)]
    pub era: String,
    /// One-line personality summary.
    pub personality: String,
    #[serde(default)]
    pub description: String,
    pub expertise: Vec<String>,
    /// Behavioral-approach directive.
    pub approach: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub biases: Vec<String>,
    #[serde(default)]
    pub quirks: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    /// Special-duty rules, rendered under the role's duty heading.
    #[serde(default)]
    pub protocol: Vec<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub backend: BackendKind,
}

impl Persona {
    pub fn is_skeptic(&self) -> bool {
        self.role.is_skeptic()
    }

    /// Relevance of this persona to a free-text topic.
    ///
    /// Each whitespace-separated keyword scores 2 when it appears in any
    /// expertise tag and 1 when it appears in the description.
    pub fn relevance(&self, topic: &str) -> u32 {
        let expertise = self.expertise.join(" ").to_lowercase();
        let description = self.description.to_lowercase();
        topic
            .to_lowercase()
            .split_whitespace()
            .map(|keyword| {
                let mut score = 0;
                if expertise.contains(keyword) {
                    score += 2;
                }
                if description.contains(keyword) {
                    score += 1;
                }
                score
            })
            .sum()
    }
}

/// Built-in persona sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Roster {
    /// Nine archetypes, a tenth-man skeptic and a synthesizer on three backends.
    #[default]
    Discovery,
    /// Nine historical physicists and a devil's advocate on one backend.
    Legends,
}

impl FromStr for Roster {
    type Err = PersonaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "legends" => Ok(Self::Legends),
            other => Err(PersonaError::UnknownRoster(other.to_string())),
        }
    }
}

impl std::fmt::Display for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Legends => write!(f, "legends"),
        }
    }
}

#[derive(Deserialize)]
struct PersonaFile {
    #[serde(rename = "persona")]
    personas: Vec<Persona>,
}

/// Ordered, validated persona catalog. Order is registration order and is
/// the tie-break order everywhere downstream.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Arc<Persona>>,
}

impl PersonaRegistry {
    /// Validate and register personas in the given order.
    pub fn new(personas: Vec<Persona>) -> Result<Self, PersonaError> {
        if personas.is_empty() {
            return Err(PersonaError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for persona in &personas {
            if !seen.insert(persona.key.as_str()) {
                return Err(PersonaError::DuplicateKey(persona.key.clone()));
            }
        }
        let skeptics = personas.iter().filter(|p| p.is_skeptic()).count();
        if skeptics > 1 {
            return Err(PersonaError::MultipleSkeptics(skeptics));
        }
        Ok(Self {
            personas: personas.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn builtin(roster: Roster) -> Self {
        let personas = match roster {
            Roster::Discovery => catalog::discovery(),
            Roster::Legends => catalog::legends(),
        };
        Self {
            personas: personas.into_iter().map(Arc::new).collect(),
        }
    }

    /// Parse a TOML document of `[[persona]]` tables.
    pub fn from_toml_str(source: &str) -> Result<Self, PersonaError> {
        let file: PersonaFile = toml::from_str(source)?;
        Self::new(file.personas)
    }

    pub fn from_file(path: &Path) -> Result<Self, PersonaError> {
        let source = std::fs::read_to_string(path).map_err(|source| PersonaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Persona>> {
        self.personas.iter().find(|p| p.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Persona>> {
        self.personas.iter()
    }

    pub fn skeptic(&self) -> Option<&Arc<Persona>> {
        self.personas.iter().find(|p| p.is_skeptic())
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}
