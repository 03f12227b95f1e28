//! HTTP adapters for the hosted backends
//!
//! DeepSeek and OpenAI share the chat-completions wire shape and differ only
//! in the output-length field name. Anthropic's messages API takes the system
//! prompt as a top-level field and returns content blocks.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

use super::{
    BackendKind, ChatRequest, ChatResponse, GatewayError, MessageRole, ModelBackend, TokenUsage,
};
use crate::config::ProviderConfig;

/// Build the adapter for `kind` from provider settings and an API key.
pub fn build_backend(
    kind: BackendKind,
    provider: &ProviderConfig,
    api_key: Option<String>,
) -> Arc<dyn ModelBackend> {
    let api_key = api_key.unwrap_or_default();
    match kind {
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(
            api_key,
            &provider.base_url,
            &provider.model,
        )),
        BackendKind::DeepSeek | BackendKind::OpenAi => Arc::new(OpenAiCompatibleBackend::new(
            kind,
            api_key,
            &provider.base_url,
            &provider.model,
        )),
    }
}

/// Reqwest client without its own timeout; the gateway owns the deadline.
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn error_for_status(
    backend: BackendKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, GatewayError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        backend,
        status,
        body,
    })
}

// ── Chat completions (DeepSeek, OpenAI) ─────────────────────────────

/// Adapter for `/chat/completions` style APIs.
pub struct OpenAiCompatibleBackend {
    kind: BackendKind,
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CompletionBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiCompatibleBackend {
    pub fn new(kind: BackendKind, api_key: String, base_url: &str, model: &str) -> Self {
        Self {
            kind,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http_client(),
        }
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.params.temperature,
        });
        // OpenAI's newer models reject `max_tokens`.
        let length_field = match self.kind {
            BackendKind::OpenAi => "max_completion_tokens",
            _ => "max_tokens",
        };
        body[length_field] = serde_json::json!(request.params.max_tokens);
        body
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        if self.api_key.is_empty() {
            return Err(GatewayError::MissingApiKey(self.kind));
        }
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                backend: self.kind,
                message: e.to_string(),
            })?;
        let response = error_for_status(self.kind, response).await?;

        let body: CompletionBody = response.json().await.map_err(|e| GatewayError::Decode {
            backend: self.kind,
            message: e.to_string(),
        })?;
        completion_response(self.kind, &self.model, body, start.elapsed().as_millis() as u64)
    }
}

/// Normalize a chat-completions body: the first non-empty choice wins.
fn completion_response(
    kind: BackendKind,
    default_model: &str,
    body: CompletionBody,
    latency_ms: u64,
) -> Result<ChatResponse, GatewayError> {
    let content = body
        .choices
        .into_iter()
        .filter_map(|c| c.message.and_then(|m| m.content))
        .find(|c| !c.trim().is_empty())
        .ok_or(GatewayError::EmptyResponse(kind))?;

    Ok(ChatResponse {
        content,
        model: body.model.unwrap_or_else(|| default_model.to_string()),
        usage: body.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        latency_ms,
    })
}

// ── Anthropic messages ──────────────────────────────────────────────

/// Adapter for Anthropic's `/messages` API.
pub struct AnthropicBackend {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MessagesBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Option<Vec<ContentBlock>>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: http_client(),
        }
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<_> = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "system": request.system_prompt().unwrap_or_default(),
            "messages": messages,
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
        })
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let backend = BackendKind::Anthropic;
        if self.api_key.is_empty() {
            return Err(GatewayError::MissingApiKey(backend));
        }
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                backend,
                message: e.to_string(),
            })?;
        let response = error_for_status(backend, response).await?;

        let body: MessagesBody = response.json().await.map_err(|e| GatewayError::Decode {
            backend,
            message: e.to_string(),
        })?;
        messages_response(&self.model, body, start.elapsed().as_millis() as u64)
    }
}

/// Normalize a messages body by joining its text blocks.
fn messages_response(
    default_model: &str,
    body: MessagesBody,
    latency_ms: u64,
) -> Result<ChatResponse, GatewayError> {
    let content = body
        .content
        .unwrap_or_default()
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if content.trim().is_empty() {
        return Err(GatewayError::EmptyResponse(BackendKind::Anthropic));
    }

    Ok(ChatResponse {
        content,
        model: body.model.unwrap_or_else(|| default_model.to_string()),
        usage: body.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
        latency_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatMessage, GenerationParams};

    fn request() -> ChatRequest {
        ChatRequest::new(
            vec![
                ChatMessage::system("You are Euler."),
                ChatMessage::user("Think about pendulums."),
            ],
            GenerationParams {
                temperature: 0.8,
                max_tokens: 2048,
            },
        )
    }

    #[test]
    fn test_openai_uses_completion_token_field() {
        let backend = OpenAiCompatibleBackend::new(
            BackendKind::OpenAi,
            "key".into(),
            "https://api.openai.com/v1/",
            "gpt-5.2-2025-12-11",
        );
        let body = backend.request_body(&request());
        assert_eq!(body["max_completion_tokens"], 2048);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(backend.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_deepseek_uses_max_tokens() {
        let backend = OpenAiCompatibleBackend::new(
            BackendKind::DeepSeek,
            "key".into(),
            "https://api.deepseek.com/v1",
            "deepseek-chat",
        );
        let body = backend.request_body(&request());
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["model"], "deepseek-chat");
    }

    #[test]
    fn test_anthropic_splits_system_prompt() {
        let backend =
            AnthropicBackend::new("key".into(), "https://api.anthropic.com/v1", "claude-opus-4-5");
        let body = backend.request_body(&request());
        assert_eq!(body["system"], "You are Euler.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    fn completion(kind: BackendKind, body: serde_json::Value) -> Result<ChatResponse, GatewayError> {
        completion_response(kind, "configured-model", serde_json::from_value(body).unwrap(), 12)
    }

    fn messages(body: serde_json::Value) -> Result<ChatResponse, GatewayError> {
        messages_response("configured-model", serde_json::from_value(body).unwrap(), 12)
    }

    #[test]
    fn test_openai_completion_is_normalized() {
        let response = completion(
            BackendKind::OpenAi,
            serde_json::json!({
                "id": "chatcmpl-1",
                "model": "gpt-5.2-2025-12-11",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"thinking\": \"t\"}"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160}
            }),
        )
        .unwrap();
        assert_eq!(response.content, "{\"thinking\": \"t\"}");
        assert_eq!(response.model, "gpt-5.2-2025-12-11");
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input_tokens: 120,
                output_tokens: 40
            })
        );
        assert_eq!(response.latency_ms, 12);
    }

    #[test]
    fn test_deepseek_completion_falls_back_to_configured_model() {
        let response = completion(
            BackendKind::DeepSeek,
            serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": null}},
                    {"message": {"role": "assistant", "content": "Pendulums are isochronous."}}
                ]
            }),
        )
        .unwrap();
        assert_eq!(response.content, "Pendulums are isochronous.");
        assert_eq!(response.model, "configured-model");
        assert!(response.usage.is_none());
    }

    #[test]
    fn test_empty_completion_is_an_error() {
        for body in [
            serde_json::json!({}),
            serde_json::json!({"choices": []}),
            serde_json::json!({"choices": [{"message": {"content": null}}]}),
            serde_json::json!({"choices": [{"message": {"content": "  "}}]}),
        ] {
            assert_eq!(
                completion(BackendKind::DeepSeek, body).unwrap_err(),
                GatewayError::EmptyResponse(BackendKind::DeepSeek)
            );
        }
    }

    #[test]
    fn test_anthropic_joins_text_blocks() {
        let response = messages(serde_json::json!({
            "id": "msg_1",
            "type": "message",
            "model": "claude-opus-4-5",
            "content": [
                {"type": "text", "text": "{\"thinking\": "},
                {"type": "tool_use", "id": "t1", "name": "calc", "input": {}},
                {"type": "text", "text": "\"t\"}"}
            ],
            "usage": {"input_tokens": 300, "output_tokens": 25}
        }))
        .unwrap();
        assert_eq!(response.content, "{\"thinking\": \"t\"}");
        assert_eq!(response.model, "claude-opus-4-5");
        assert_eq!(response.usage.unwrap().output_tokens, 25);
    }

    #[test]
    fn test_anthropic_without_text_is_an_error() {
        for body in [
            serde_json::json!({"content": []}),
            serde_json::json!({"content": null}),
            serde_json::json!({"content": [{"type": "tool_use", "id": "t1", "name": "calc", "input": {}}]}),
        ] {
            assert_eq!(
                messages(body).unwrap_err(),
                GatewayError::EmptyResponse(BackendKind::Anthropic)
            );
        }
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let backend = AnthropicBackend::new(String::new(), "http://127.0.0.1:9", "m");
        assert!(!backend.is_available());
        let err = backend.complete(&request()).await.unwrap_err();
        assert_eq!(err, GatewayError::MissingApiKey(BackendKind::Anthropic));
    }
}
