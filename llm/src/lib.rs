//! Minimal client for OpenAI-compatible chat-completions endpoints.
//!
//! Talks to local model servers (LM Studio, Ollama's OpenAI-compatible
//! surface, llama.cpp's server, etc.) rather than a hosted provider: the
//! base URL, model name, and timeout are all caller-supplied.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Studio-style default (LM Studio and similar OpenAI-shaped servers).
pub const DEFAULT_BASE_URL_STUDIO: &str = "http://127.0.0.1:1234/v1";
/// Daemon-style default (Ollama's native API).
pub const DEFAULT_BASE_URL_DAEMON: &str = "http://127.0.0.1:11434/api";

#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("configuration error: {0}")]
    Config(String),
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A completed chat-completions request: `temperature`, `max_tokens`, and a
/// per-call `timeout` that mirror the three named LLM profiles ("lite",
/// "normal", "complete") a caller selects between.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest<'a> {
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: String,
}

/// Thin wrapper over an OpenAI-compatible `/chat/completions` endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    model: Option<String>,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), model: None }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }

    /// Issue one non-streaming completion request, returning the raw text
    /// content of the first choice.
    ///
    /// If the server replies with HTTP 400 and a model-not-found style
    /// message, the call is retried once with the `model` field omitted
    /// entirely, since some local servers reject any non-null model field.
    pub async fn complete(&self, request: CompletionRequest) -> Result<String, Error> {
        match self.send(&request, self.model.as_deref()).await {
            Err(Error::Api { status, message }) if status == 400 && looks_like_model_not_found(&message) => {
                self.send(&request, None).await
            }
            other => other,
        }
    }

    async fn send(&self, request: &CompletionRequest, model: Option<&str>) -> Result<String, Error> {
        let body = ApiRequest {
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            model,
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(request.timeout)
                } else {
                    Error::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { status: status.as_u16(), message });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Parse("response had no choices".to_string()))
    }
}

/// Abstraction over "can turn a completion request into text", so callers
/// can substitute a scripted double in tests without touching the network.
#[async_trait::async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, Error>;
}

#[async_trait::async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, Error> {
        LlmClient::complete(self, request).await
    }
}

fn looks_like_model_not_found(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("model") && (lowered.contains("not found") || lowered.contains("does not exist") || lowered.contains("unknown"))
}

/// The JSON contract the model is expected to reply with: a tool call (or
/// none), free narrative text, an optional mode transition, and a memory
/// delta to fold into narrative memory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub mode_change: Option<String>,
    #[serde(default)]
    pub memory: serde_json::Value,
}

/// Extract the model's `{tool, parameters, narrative, mode_change, memory}`
/// reply from raw text, tolerating markdown code fences and leading/trailing
/// prose around the JSON object.
///
/// Schema mismatches degrade gracefully: a non-string `narrative` is
/// dropped, an unparseable body falls back to treating the whole input as
/// narrative text.
pub fn parse_model_turn(raw: &str) -> ModelTurn {
    match extract_json_object(raw) {
        Some(json_text) => match serde_json::from_str::<serde_json::Value>(&json_text) {
            Ok(value) => turn_from_value(value),
            Err(_) => ModelTurn { narrative: Some(raw.trim().to_string()), ..Default::default() },
        },
        None => ModelTurn { narrative: Some(raw.trim().to_string()), ..Default::default() },
    }
}

fn turn_from_value(value: serde_json::Value) -> ModelTurn {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return ModelTurn { narrative: Some(value.to_string()), ..Default::default() },
    };

    let tool = obj
        .get("tool")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let narrative = match obj.get("narrative") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    let mode_change = obj
        .get("mode_change")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let parameters = obj.get("parameters").cloned().unwrap_or(serde_json::Value::Null);
    let memory = obj.get("memory").cloned().unwrap_or(serde_json::Value::Null);

    ModelTurn { tool, parameters, narrative, mode_change, memory }
}

/// Find and return the first balanced `{...}` block in `text`, stripping
/// surrounding markdown fences (` ```json ... ``` ` or plain ` ``` `).
fn extract_json_object(text: &str) -> Option<String> {
    let stripped = strip_code_fence(text.trim());
    let bytes = stripped.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(stripped[start..end].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let raw = r#"{"tool": "roll_dice", "parameters": {"notation": "1d20"}, "narrative": "You roll.", "mode_change": null, "memory": {}}"#;
        let turn = parse_model_turn(raw);
        assert_eq!(turn.tool.as_deref(), Some("roll_dice"));
        assert_eq!(turn.narrative.as_deref(), Some("You roll."));
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"tool\": null, \"parameters\": {}, \"narrative\": \"The door creaks open.\", \"mode_change\": \"exploration\", \"memory\": {}}\n```";
        let turn = parse_model_turn(raw);
        assert!(turn.tool.is_none());
        assert_eq!(turn.mode_change.as_deref(), Some("exploration"));
        assert_eq!(turn.narrative.as_deref(), Some("The door creaks open."));
    }

    #[test]
    fn falls_back_to_raw_narrative_on_unparseable_body() {
        let raw = "The goblin snarls and lunges at you!";
        let turn = parse_model_turn(raw);
        assert!(turn.tool.is_none());
        assert_eq!(turn.narrative.as_deref(), Some(raw));
    }

    #[test]
    fn drops_non_string_narrative() {
        let raw = r#"{"tool": null, "parameters": {}, "narrative": 42, "mode_change": null, "memory": {}}"#;
        let turn = parse_model_turn(raw);
        assert!(turn.narrative.is_none());
    }

    #[test]
    fn model_not_found_detector() {
        assert!(looks_like_model_not_found("Error: model 'gpt-5' not found"));
        assert!(!looks_like_model_not_found("internal server error"));
    }
}
