//! Model Gateway — uniform text generation over heterogeneous backends
//!
//! Every persona talks to exactly one backend (DeepSeek, Anthropic or
//! OpenAI). Each backend has its own adapter implementing [`ModelBackend`]
//! and normalizing its wire shape into a [`ChatResponse`]. The
//! [`ModelGateway`] wraps an adapter with a per-attempt deadline and a
//! bounded, fixed-delay retry loop.
//!
//! # Design
//!
//! ```text
//! Agent ──ChatRequest──▶ ModelGateway ──attempt 1..=N──▶ ModelBackend
//!                           │  timeout(attempt_timeout)      │
//!                           │  sleep(retry_delay) on error   │
//!                           ◀──────── ChatResponse ──────────┘
//!                           └─ last GatewayError after N failures
//! ```

mod providers;
mod scripted;

pub use providers::{build_backend, AnthropicBackend, OpenAiCompatibleBackend};
pub use scripted::ScriptedBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from a single backend round-trip.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("{backend} request timed out after {after:?}")]
    Timeout { backend: BackendKind, after: Duration },

    #[error("{backend} API error ({status}): {body}")]
    Status {
        backend: BackendKind,
        status: u16,
        body: String,
    },

    #[error("{backend} transport error: {message}")]
    Transport {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} response decode error: {message}")]
    Decode {
        backend: BackendKind,
        message: String,
    },

    #[error("API key not configured for {0}")]
    MissingApiKey(BackendKind),

    #[error("{0} returned no generated message")]
    EmptyResponse(BackendKind),
}

impl GatewayError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// A missing credential never fixes itself between attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingApiKey(_))
    }
}

/// Text-generation backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::DeepSeek, Self::Anthropic, Self::OpenAi];

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-chat",
            Self::Anthropic => "claude-opus-4-5",
            Self::OpenAi => "gpt-5.2-2025-12-11",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Environment variable holding this backend's credential.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeepSeek => write!(f, "deepseek"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Speaker tag of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 4096,
        }
    }
}

/// A full generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    /// Overrides the backend's configured model when set.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>, params: GenerationParams) -> Self {
        Self {
            messages,
            params,
            model: None,
        }
    }

    /// Content of the first system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Normalized response shared by every backend adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated message body.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
}

/// One backend adapter. Implementations perform a single attempt; retry and
/// deadline handling live in [`ModelGateway`].
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// Whether the backend has what it needs to serve requests.
    fn is_available(&self) -> bool {
        true
    }
}

/// Deadline and retry settings for gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(90),
            retry_delay: Duration::from_millis(1500),
        }
    }
}

/// Backend adapter plus retry policy.
pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    policy: RetryPolicy,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self::with_policy(backend, RetryPolicy::default())
    }

    pub fn with_policy(backend: Arc<dyn ModelBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one request with per-attempt deadline and bounded retry.
    ///
    /// Returns the first successful response, or the last error once
    /// `max_attempts` attempts have failed.
    pub async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let backend = self.backend.kind();
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = GatewayError::EmptyResponse(backend);

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.policy.attempt_timeout, self.backend.complete(request))
                    .await
                    .unwrap_or(Err(GatewayError::Timeout {
                        backend,
                        after: self.policy.attempt_timeout,
                    }));

            match outcome {
                Ok(response) => {
                    debug!(
                        %backend,
                        attempt,
                        latency_ms = response.latency_ms,
                        "Generation succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    warn!(%backend, attempt, max_attempts = attempts, error = %e, "Generation attempt failed");
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// One gateway per backend family, shared by every agent bound to it.
#[derive(Clone, Default)]
pub struct GatewaySet {
    gateways: HashMap<BackendKind, Arc<ModelGateway>>,
}

impl GatewaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, gateway: ModelGateway) -> &mut Self {
        self.gateways.insert(gateway.kind(), Arc::new(gateway));
        self
    }

    /// Route every backend family to the same adapter.
    pub fn uniform(backend: Arc<dyn ModelBackend>, policy: RetryPolicy) -> Self {
        let gateway = Arc::new(ModelGateway::with_policy(backend, policy));
        let gateways = BackendKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::clone(&gateway)))
            .collect();
        Self { gateways }
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<ModelGateway>> {
        self.gateways.get(&kind).cloned()
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.gateways.contains_key(&kind)
    }
}
