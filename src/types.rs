//! Canonical request and response shapes
//!
//! Every backend family translates its own wire format to and from these
//! types, so callers see one shape regardless of which backend served them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Inference input: a bare prompt or a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Input {
    Prompt { prompt: String },
    Messages { messages: Vec<ChatMessage> },
}

impl Input {
    /// View the input as a conversation; a prompt becomes one user message
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            Input::Prompt { prompt } => vec![ChatMessage::user(prompt.clone())],
            Input::Messages { messages } => messages.clone(),
        }
    }

    /// Collapse the input into a single prompt string
    ///
    /// A prompt passes through unchanged. Messages become `role: content`
    /// lines joined with a newline.
    pub fn to_prompt(&self) -> String {
        match self {
            Input::Prompt { prompt } => prompt.clone(),
            Input::Messages { messages } => messages
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Backend-agnostic inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub input: Input,
    /// `None` lets the backend family apply its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl InferenceRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            input: Input::Prompt {
                prompt: prompt.into(),
            },
            stream: None,
            options: Map::new(),
        }
    }

    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: None,
            input: Input::Messages { messages },
            stream: None,
            options: Map::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Canonical chat response returned by every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub message: ChatMessage,
    pub done: bool,
    pub model: String,
}

impl CanonicalResponse {
    pub fn assistant(content: impl Into<String>, model: impl Into<String>, done: bool) -> Self {
        Self {
            message: ChatMessage::assistant(content),
            done,
            model: model.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }
}

/// Catalog entry for a model available on a backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl ModelInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Detailed model descriptor returned by `show_model`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Request to build a new model from an existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateModelRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

/// Embedding request; each input string yields one vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: Vec<String>,
}

/// Final status line of a pull, push, or create operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub status: String,
}

impl OperationStatus {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}

/// Result of a raw health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub running_models: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
    /// Milliseconds since the UNIX epoch
    pub checked_at: u64,
}

/// Kind of call recorded in a client's request history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Generate,
    Chat,
    ListModels,
    ListRunningModels,
    ShowModel,
    PullModel,
    PushModel,
    DeleteModel,
    CreateModel,
    CopyModel,
    Embed,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Generate => "generate",
            Operation::Chat => "chat",
            Operation::ListModels => "list_models",
            Operation::ListRunningModels => "list_running_models",
            Operation::ShowModel => "show_model",
            Operation::PullModel => "pull_model",
            Operation::PushModel => "push_model",
            Operation::DeleteModel => "delete_model",
            Operation::CreateModel => "create_model",
            Operation::CopyModel => "copy_model",
            Operation::Embed => "embed",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed call in a client's request history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub operation: Operation,
    pub started_at: u64,
    pub duration_ms: u64,
    pub success: bool,
}

/// Snapshot of a client's in-flight and recent work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub active_requests: usize,
    pub total_requests: u64,
    /// Requests completed within the last five minutes
    pub recent_requests: usize,
    pub average_response_time_ms: f64,
    pub history: Vec<RequestSummary>,
}
