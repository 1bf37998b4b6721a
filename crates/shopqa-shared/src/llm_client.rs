//! LLM Client Abstraction
//!
//! Every model exchange in ShopQA (domain handlers, intent classifier,
//! summarizer, chart generator, tool selection) goes through [`LlmClient`].
//! Supports a real HTTP backend (OpenAI-compatible or Azure OpenAI) and a
//! scripted fake for tests.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Configuration
// ============================================================================

/// Backend dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// `/v1/chat/completions` with bearer auth (OpenAI, Ollama, vLLM...)
    Openai,
    /// Azure OpenAI deployment with `api-key` header
    Azure,
}

impl Default for Provider {
    fn default() -> Self {
        Self::Openai
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "azure" => Ok(Self::Azure),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub provider: Provider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name, or deployment name for Azure
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Only used by the Azure dialect
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_api_version() -> String {
    "2024-02-01".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provider: Provider::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            api_version: default_api_version(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout(),
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// LLM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Assistant turn that requested tool calls
    pub fn assistant(reply: &AssistantReply) -> Self {
        Self {
            role: Role::Assistant,
            content: reply.content.clone(),
            tool_calls: reply.tool_calls.clone(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the model, not yet validated
    pub arguments: String,
}

/// Tool advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Model reply in a tool-calling exchange
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }
}

// ============================================================================
// Client trait
// ============================================================================

/// Generic LLM client trait
pub trait LlmClient: Send + Sync {
    /// Plain completion; returns the assistant text
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Completion with tools available; the model may answer or request calls
    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError>;
}

/// Real LLM client implementation using HTTP
pub struct HttpLlmClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        match self.config.provider {
            Provider::Openai => format!("{}/v1/chat/completions", base),
            Provider::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, self.config.model, self.config.api_version
            ),
        }
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> serde_json::Value {
        let wire_messages: Vec<serde_json::Value> = messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": wire_messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        if !tools.is_empty() {
            let wire_tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(wire_tools);
        }

        body
    }

    fn send(&self, body: &serde_json::Value) -> Result<serde_json::Value, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        debug!("LLM request: {} bytes to {}", body.to_string().len(), self.url());

        let mut request = self.client.post(self.url()).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = match self.config.provider {
                Provider::Openai => request.bearer_auth(api_key),
                Provider::Azure => request.header("api-key", api_key),
            };
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout_secs)
            } else {
                LlmError::HttpError(format!("Request failed: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from chat completions API",
                response.status()
            )));
        }

        response
            .json()
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))
    }
}

impl LlmClient for HttpLlmClient {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = self.request_body(messages, &[]);
        let reply = parse_completion(&self.send(&body)?)?;
        reply.content.ok_or(LlmError::EmptyResponse)
    }

    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError> {
        let body = self.request_body(messages, tools);
        parse_completion(&self.send(&body)?)
    }
}

fn message_to_wire(message: &ChatMessage) -> serde_json::Value {
    let mut wire = serde_json::json!({
        "role": message.role,
        "content": message.content,
    });

    if !message.tool_calls.is_empty() {
        let calls: Vec<serde_json::Value> = message
            .tool_calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect();
        wire["tool_calls"] = serde_json::Value::Array(calls);
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = serde_json::Value::String(id.clone());
    }

    wire
}

/// Extract the first choice of a chat-completions response
fn parse_completion(response: &serde_json::Value) -> Result<AssistantReply, LlmError> {
    let message = response
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .ok_or(LlmError::EmptyResponse)?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let tool_calls: Vec<ToolCall> = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let function = c.get("function")?;
                    let arguments = match function.get("arguments") {
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => "{}".to_string(),
                    };
                    Some(ToolCall {
                        id: c.get("id").and_then(|v| v.as_str()).unwrap_or("call_0").to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if content.is_none() && tool_calls.is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    Ok(AssistantReply { content, tool_calls })
}

// ============================================================================
// Response text helpers
// ============================================================================

/// Remove Markdown code fences the model likes to wrap output in
pub fn strip_code_fences(text: &str) -> String {
    let mut out = text.trim().to_string();
    for fence in ["```json", "```JSON", "```python", "```"] {
        out = out.replace(fence, "");
    }
    out.trim().to_string()
}

/// Extract the outermost `{...}` span from model text
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

// ============================================================================
// Fake client
// ============================================================================

/// Fake LLM client for testing
///
/// Replays scripted replies in order; once a single reply is left it is
/// returned for every further call. Every request transcript is recorded.
pub struct FakeLlmClient {
    responses: Mutex<Vec<Result<AssistantReply, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeLlmClient {
    /// Create a fake client with pre-defined responses
    pub fn new(responses: Vec<Result<AssistantReply, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scripted plain-text replies
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(AssistantReply::text(*t))).collect())
    }

    /// Create a fake client that always returns the same text
    pub fn always_text(text: &str) -> Self {
        Self::with_texts(&[text])
    }

    /// Create a fake client that always returns an error
    pub fn always_error(error: LlmError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Get the number of calls made
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Transcripts of every request, in call order
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next(&self, messages: &[ChatMessage]) -> Result<AssistantReply, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let mut responses = match self.responses.lock() {
            Ok(r) => r,
            Err(_) => return Err(LlmError::EmptyResponse),
        };
        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => responses[0].clone(),
            _ => responses.remove(0),
        }
    }
}

impl LlmClient for FakeLlmClient {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let reply = self.next(messages)?;
        reply.content.ok_or(LlmError::EmptyResponse)
    }

    fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<AssistantReply, LlmError> {
        self.next(messages)
    }
}
