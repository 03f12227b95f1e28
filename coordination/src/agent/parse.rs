//! Reply envelope validation
//!
//! A reply is accepted only when a JSON object can be located in it and that
//! object validates against [`Envelope`]. Anything else takes the single
//! fallback path: the raw text becomes `thinking` and the role's fallback
//! agreement is used.

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::OnceLock;

use super::action::{AgentAction, TheoryDraft};

/// The documented reply shape for both think and respond calls.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Reasoning process.
    pub thinking: String,
    /// Self-reported agreement, 0-100.
    #[serde(alias = "agreement_level")]
    pub agreement: f64,
    /// What the agent is currently investigating.
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub theory: Option<TheoryDraft>,
    /// Direct answer to the incoming message (respond calls).
    #[serde(default)]
    pub response: Option<String>,
    /// `{type, params}` objects.
    #[serde(default)]
    pub actions: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub message_to_others: Option<String>,
}

/// Pretty-printed JSON schema of [`Envelope`], embedded in system prompts.
pub fn envelope_schema() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::to_string_pretty(&schemars::schema_for!(Envelope)).unwrap_or_default()
    })
}

/// Outcome of interpreting one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    /// The reply validated against the envelope.
    Structured(StructuredReply),
    /// The reply could not be validated; carries the raw text and reason.
    Unparsed { raw: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply {
    pub thinking: String,
    pub agreement: u8,
    pub focus: Option<String>,
    pub response: Option<String>,
    pub theory: Option<TheoryDraft>,
    pub actions: Vec<AgentAction>,
    pub rejected_actions: Vec<String>,
    pub message_to_others: Option<String>,
    pub notes: Vec<String>,
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
    })
}

/// Locate the candidate JSON object: a fenced block if present, otherwise
/// the span from the first `{` to the last `}`.
pub fn locate_object(raw: &str) -> Option<&str> {
    if let Some(inner) = fenced_block().captures(raw).and_then(|c| c.get(1)) {
        return Some(inner.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Round and clamp a self-reported agreement into `0..=100`.
pub fn clamp_agreement(value: f64) -> (u8, Option<String>) {
    if !value.is_finite() {
        return (0, Some(format!("non-finite agreement {value} replaced by 0")));
    }
    let rounded = value.round();
    let clamped = rounded.clamp(0.0, 100.0);
    let note = (clamped != rounded).then(|| format!("agreement {value} clamped to {clamped}"));
    (clamped as u8, note)
}

/// Interpret a raw backend reply.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let unparsed = |reason: String| ParsedReply::Unparsed {
        raw: raw.to_string(),
        reason,
    };

    let Some(candidate) = locate_object(raw) else {
        return unparsed("no JSON object found in reply".to_string());
    };
    let envelope: Envelope = match serde_json::from_str(candidate) {
        Ok(envelope) => envelope,
        Err(e) => return unparsed(format!("reply does not match envelope: {e}")),
    };

    let (agreement, clamp_note) = clamp_agreement(envelope.agreement);
    let mut actions = Vec::new();
    let mut rejected_actions = Vec::new();
    for value in envelope.actions.unwrap_or_default() {
        match AgentAction::from_value(value) {
            Ok(action) => actions.push(action),
            Err(reason) => rejected_actions.push(reason),
        }
    }

    ParsedReply::Structured(StructuredReply {
        thinking: envelope.thinking,
        agreement,
        focus: envelope.focus,
        response: envelope.response,
        theory: envelope.theory,
        actions,
        rejected_actions,
        message_to_others: envelope.message_to_others.filter(|m| !m.trim().is_empty()),
        notes: clamp_note.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(raw: &str) -> StructuredReply {
        match parse_reply(raw) {
            ParsedReply::Structured(reply) => reply,
            ParsedReply::Unparsed { reason, .. } => panic!("expected structured reply: {reason}"),
        }
    }

    #[test]
    fn test_parses_plain_envelope() {
        let reply = structured(
            r#"{"thinking": "Pendulum periods scale with sqrt(L)", "agreement": 82,
                "theory": {"name": "Isochronism", "description": "Small swings share a period"},
                "message_to_others": "Faraday, can you measure this?"}"#,
        );
        assert_eq!(reply.agreement, 82);
        assert_eq!(reply.theory.unwrap().name, "Isochronism");
        assert_eq!(
            reply.message_to_others.as_deref(),
            Some("Faraday, can you measure this?")
        );
        assert!(reply.notes.is_empty());
    }

    #[test]
    fn test_parses_fenced_envelope_with_prose() {
        let raw = "Here is my answer:\n```json\n{\"thinking\": \"t\", \"agreement_level\": 30, \"response\": \"No.\"}\n```\nThanks.";
        let reply = structured(raw);
        assert_eq!(reply.agreement, 30);
        assert_eq!(reply.response.as_deref(), Some("No."));
    }

    #[test]
    fn test_non_json_is_unparsed() {
        let raw = "I refuse to answer in JSON.";
        match parse_reply(raw) {
            ParsedReply::Unparsed { raw: text, .. } => assert_eq!(text, raw),
            other => panic!("expected unparsed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_field_is_unparsed() {
        assert!(matches!(
            parse_reply(r#"{"thinking": "no agreement given"}"#),
            ParsedReply::Unparsed { .. }
        ));
    }

    #[test]
    fn test_agreement_is_clamped_with_note() {
        let reply = structured(r#"{"thinking": "t", "agreement": 140}"#);
        assert_eq!(reply.agreement, 100);
        assert_eq!(reply.notes.len(), 1);

        let reply = structured(r#"{"thinking": "t", "agreement": -5}"#);
        assert_eq!(reply.agreement, 0);

        let reply = structured(r#"{"thinking": "t", "agreement": 69.6}"#);
        assert_eq!(reply.agreement, 70);
        assert!(reply.notes.is_empty());
    }

    #[test]
    fn test_bad_actions_are_rejected_individually() {
        let reply = structured(
            r#"{"thinking": "t", "agreement": 80, "actions": [
                {"type": "RECORD_DISCOVERY", "params": {"discovery": "x"}},
                {"type": "DANCE", "params": {}}
            ]}"#,
        );
        assert_eq!(reply.actions.len(), 1);
        assert_eq!(reply.rejected_actions.len(), 1);
        assert!(reply.rejected_actions[0].contains("DANCE"));
    }

    #[test]
    fn test_null_optional_fields_keep_the_envelope() {
        let reply = structured(
            r#"{"thinking": "t", "agreement": 90,
                "theory": {"name": "Isochronism", "description": "d", "predictions": null},
                "actions": null, "message_to_others": null}"#,
        );
        assert_eq!(reply.agreement, 90);
        assert!(reply.actions.is_empty());
        assert!(reply.message_to_others.is_none());
        let theory = reply.theory.unwrap();
        assert_eq!(theory.name, "Isochronism");
        assert!(theory.predictions.is_empty());
    }

    #[test]
    fn test_numeric_predictions_become_text() {
        let reply = structured(
            r#"{"thinking": "t", "agreement": 64,
                "theory": {"name": "Isochronism", "predictions": ["T=2.0s", 2.84, null], "tests": 3}}"#,
        );
        let theory = reply.theory.unwrap();
        assert_eq!(theory.predictions, vec!["T=2.0s".to_string(), "2.84".to_string()]);
        assert_eq!(theory.tests, vec!["3".to_string()]);
        assert_eq!(reply.agreement, 64);
    }

    #[test]
    fn test_first_of_two_fenced_envelopes_is_used() {
        let raw = "First draft:\n```json\n{\"thinking\": \"first\", \"agreement\": 40, \"theory\": {\"name\": \"Isochronism\"}}\n```\nRevised:\n```json\n{\"thinking\": \"second\", \"agreement\": 60}\n```";
        let reply = structured(raw);
        assert_eq!(reply.thinking, "first");
        assert_eq!(reply.agreement, 40);
        assert_eq!(reply.theory.unwrap().name, "Isochronism");
    }

    #[test]
    fn test_schema_mentions_envelope_fields() {
        let schema = envelope_schema();
        assert!(schema.contains("thinking"));
        assert!(schema.contains("agreement"));
        assert!(schema.contains("message_to_others"));
    }
}
