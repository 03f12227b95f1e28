//! Prompt construction
//!
//! Role-specific text comes only from [`RoleProtocol`]; this module never
//! inspects the role directly.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::str::FromStr;

use super::action::ACTION_CATALOG;
use super::parse::envelope_schema;
use super::{Interaction, ThinkContext};
use crate::persona::{Persona, RoleProtocol};

/// Deliberation language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    pub fn instruction(self) -> &'static str {
        match self {
            Self::En => "You MUST respond in ENGLISH. All your thoughts, analyses, theories, and communications must be written in English.",
            Self::Es => "DEBES responder SIEMPRE en ESPAÑOL. Todos tus pensamientos, análisis, teorías y comunicaciones deben estar escritos en español.",
        }
    }

    pub fn response_format(self) -> &'static str {
        match self {
            Self::En => "Always respond in English.",
            Self::Es => "Responde siempre en español.",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "es" => Ok(Self::Es),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::En => write!(f, "en"),
            Self::Es => write!(f, "es"),
        }
    }
}

/// System prompt: identity, expertise, role duty, actions and reply schema.
pub fn system_prompt(persona: &Persona, language: Language) -> String {
    let protocol = persona.role.protocol();
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "**CRITICAL LANGUAGE INSTRUCTION**: {}\n",
        language.instruction()
    );
    let _ = writeln!(prompt, "You are {}, a physics discovery agent.", persona.name);
    let _ = writeln!(prompt, "PERSONALITY: {}", persona.personality);
    if !persona.description.is_empty() {
        let _ = writeln!(prompt, "DESCRIPTION: {}", persona.description);
    }
    let _ = writeln!(prompt, "APPROACH: {}", persona.approach);
    let _ = writeln!(prompt, "EXPERTISE: {}", persona.expertise.join(", "));
    if let Some(style) = &persona.style {
        let _ = writeln!(prompt, "STYLE: {style}");
    }
    if !persona.biases.is_empty() {
        let _ = writeln!(prompt, "KNOWN BIASES: {}", persona.biases.join("; "));
    }
    if let Some(quirks) = &persona.quirks {
        let _ = writeln!(prompt, "QUIRKS: {quirks}");
    }
    if let Some(quote) = &persona.quote {
        let _ = writeln!(prompt, "MOTTO: \"{quote}\"");
    }

    write_duty(&mut prompt, protocol, &persona.protocol);

    let _ = writeln!(prompt, "\nYOUR MISSION:");
    let _ = writeln!(prompt, "- Explore the boundaries of known physics");
    let _ = writeln!(prompt, "- Find connections between seemingly unrelated phenomena");
    let _ = writeln!(prompt, "- Propose and test new hypotheses");
    let _ = writeln!(prompt, "- {}", protocol.mission);

    let _ = writeln!(prompt, "\nAVAILABLE ACTIONS:");
    for (name, params) in ACTION_CATALOG {
        let _ = writeln!(prompt, "- {name}: {params}");
    }

    let (low, high) = protocol.agreement_band;
    let _ = writeln!(
        prompt,
        "\nReport `agreement` as an integer from {low} to {high} describing how much you agree with the current consensus."
    );
    let _ = writeln!(
        prompt,
        "Reply with a single JSON object matching this schema:\n{}",
        envelope_schema()
    );
    let _ = write!(prompt, "{}", language.response_format());
    prompt
}

fn write_duty(prompt: &mut String, protocol: &RoleProtocol, rules: &[String]) {
    let Some(heading) = protocol.duty_heading else {
        return;
    };
    let _ = writeln!(prompt, "\n{heading}");
    for rule in rules {
        let _ = writeln!(prompt, "- {rule}");
    }
    if !protocol.obligations.is_empty() {
        let _ = writeln!(prompt, "\nYOU MUST ALWAYS:");
        for (i, obligation) in protocol.obligations.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {obligation}", i + 1);
        }
    }
}

/// User prompt for an independent think round.
pub fn think_prompt(
    persona: &Persona,
    context: &ThinkContext,
    hypotheses: &[String],
    interactions: &[&Interaction],
) -> String {
    let protocol = persona.role.protocol();
    let context_json = serde_json::to_string_pretty(context).unwrap_or_default();
    let mut prompt = String::new();

    let _ = writeln!(prompt, "**REMEMBER: {}**\n", context.language.instruction());
    let _ = writeln!(prompt, "Current context:\n{context_json}\n");

    let _ = writeln!(prompt, "Recent discussions:");
    if interactions.is_empty() {
        let _ = writeln!(prompt, "None yet");
    }
    for interaction in interactions {
        let _ = writeln!(prompt, "{}: {}", interaction.from, interaction.message);
    }

    let _ = writeln!(prompt, "\nYour current hypotheses:");
    if hypotheses.is_empty() {
        let _ = writeln!(prompt, "None yet");
    }
    for hypothesis in hypotheses {
        let _ = writeln!(prompt, "- {hypothesis}");
    }

    let _ = writeln!(
        prompt,
        "\nBased on your personality and expertise, what would you like to explore or propose?"
    );
    let _ = writeln!(prompt, "Consider:");
    let _ = writeln!(prompt, "- What unexplained phenomena interest you?");
    let _ = writeln!(prompt, "- What experiments could reveal new physics?");
    let _ = writeln!(prompt, "- {}", protocol.think_question);
    let _ = write!(
        prompt,
        "\n{}\nRespond with your reasoning, your agreement, any theory you propose and your chosen actions as one JSON object.",
        context.language.response_format()
    );
    prompt
}

/// User prompt anchored to a single incoming message.
pub fn respond_prompt(persona: &Persona, message: &str, from: &str, language: Language) -> String {
    let protocol = persona.role.protocol();
    let mut prompt = String::new();

    let _ = writeln!(prompt, "**REMEMBER: {}**\n", language.instruction());
    let _ = writeln!(prompt, "Agent {from} says:\n\"{message}\"\n");
    if let Some(reminder) = protocol.respond_reminder {
        let _ = writeln!(prompt, "{reminder}\n");
    }
    let _ = writeln!(
        prompt,
        "Respond to this message according to your personality and expertise."
    );
    let _ = writeln!(
        prompt,
        "Your response should be substantive, referencing specific physics if relevant."
    );
    let _ = write!(
        prompt,
        "{}\nPut your reply to the other agent in `response` and how much you agree with what was said in `agreement`.",
        language.response_format()
    );
    prompt
}

/// Skeptic prompt for challenging a freshly proposed theory.
pub fn challenge_message(
    name: &str,
    description: &str,
    mathematics: Option<&str>,
    predictions: &[String],
) -> String {
    let mut message = format!(
        "NEW THEORY PROPOSED: \"{name}\"\n\nDescription: {description}\n\nMathematics: {}\n\nPredictions: {}\n\n",
        mathematics.unwrap_or("Not specified"),
        if predictions.is_empty() {
            "None specified".to_string()
        } else {
            predictions.join(", ")
        }
    );
    message.push_str(
        "As the Tenth Man, you MUST find flaws in this theory. What could be wrong? \
         What alternative explanations exist? What experiments could disprove it? \
         Which historical counter-examples should make us cautious?",
    );
    message
}
