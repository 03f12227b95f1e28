//! Deterministic backend with canned replies
//!
//! Replies are keyed on a needle searched in the request's system prompt,
//! which carries the persona identity. Used by the test suites and by the
//! server's offline mode.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{BackendKind, ChatRequest, ChatResponse, GatewayError, ModelBackend};

type Responder = Box<dyn Fn(&ChatRequest) -> Result<String, GatewayError> + Send + Sync>;

struct ScriptRule {
    needle: String,
    reply: Result<String, GatewayError>,
}

/// Backend that answers from a script instead of the network.
pub struct ScriptedBackend {
    kind: BackendKind,
    rules: Vec<ScriptRule>,
    fallback: Responder,
    delay: Option<Duration>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    /// Backend whose unmatched requests fail with an empty-response error.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            rules: Vec::new(),
            fallback: Box::new(move |_| Err(GatewayError::EmptyResponse(kind))),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Backend producing a small valid envelope for every request.
    pub fn offline() -> Self {
        Self::new(BackendKind::DeepSeek).otherwise_with(|request| {
            let speaker = request
                .system_prompt()
                .and_then(|s| s.lines().find(|l| l.starts_with("You are ")))
                .unwrap_or("You are an offline agent")
                .trim_start_matches("You are ")
                .split([',', '.'])
                .next()
                .unwrap_or("agent");
            Ok(serde_json::json!({
                "thinking": format!("{speaker} is running without a model backend."),
                "focus": "offline rehearsal",
                "agreement": 72,
                "actions": [{
                    "type": "RUN_EXPERIMENT",
                    "params": {"experiment": "pendulum", "parameters": {"length": 1.0}}
                }]
            })
            .to_string())
        })
    }

    /// Reply with `text` when the system prompt contains `needle`.
    pub fn when(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push(ScriptRule {
            needle: needle.into(),
            reply: Ok(text.into()),
        });
        self
    }

    /// Fail with `error` when the system prompt contains `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, error: GatewayError) -> Self {
        self.rules.push(ScriptRule {
            needle: needle.into(),
            reply: Err(error),
        });
        self
    }

    /// Reply with `text` when no rule matches.
    pub fn otherwise(self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.otherwise_with(move |_| Ok(text.clone()))
    }

    /// Compute the reply when no rule matches.
    pub fn otherwise_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<String, GatewayError> + Send + Sync + 'static,
    {
        self.fallback = Box::new(responder);
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests seen so far, in arrival order.
    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    fn reply_for(&self, request: &ChatRequest) -> Result<String, GatewayError> {
        let system = request.system_prompt().unwrap_or_default();
        match self.rules.iter().find(|rule| system.contains(&rule.needle)) {
            Some(rule) => rule.reply.clone(),
            None => (self.fallback)(request),
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.reply_for(request)?;
        Ok(ChatResponse {
            content,
            model: format!("scripted-{}", self.kind),
            usage: None,
            latency_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatMessage, GenerationParams};

    fn request_as(system: &str) -> ChatRequest {
        ChatRequest::new(
            vec![ChatMessage::system(system), ChatMessage::user("go")],
            GenerationParams::default(),
        )
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let backend = ScriptedBackend::new(BackendKind::DeepSeek)
            .when("Euler", "euler reply")
            .when("Eu", "shadowed")
            .otherwise("default reply");

        let euler = backend.complete(&request_as("You are Euler.")).await.unwrap();
        assert_eq!(euler.content, "euler reply");

        let other = backend.complete(&request_as("You are Bohr.")).await.unwrap();
        assert_eq!(other.content, "default reply");
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_without_fallback_fails() {
        let backend = ScriptedBackend::new(BackendKind::OpenAi);
        let err = backend.complete(&request_as("anyone")).await.unwrap_err();
        assert_eq!(err, GatewayError::EmptyResponse(BackendKind::OpenAi));
    }

    #[tokio::test]
    async fn test_offline_reply_is_an_envelope() {
        let backend = ScriptedBackend::offline();
        let reply = backend
            .complete(&request_as("You are Faraday, a physics discovery agent."))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&reply.content).unwrap();
        assert_eq!(value["agreement"], 72);
        assert!(value["thinking"].as_str().unwrap().starts_with("Faraday"));
    }
}
