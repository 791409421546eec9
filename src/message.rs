//! Data model: content parts, messages, usage, tools, context (spec.md §3).
//!
//! This module defines exactly one message wrapper type (`Message`) and the
//! content-part union it carries, resolving the "two `AgentMessage`
//! concepts" ambiguity noted in the original source: there is one tagged
//! sum type here, not a parallel dataclass-with-factories.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One unit of an assistant message's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded bytes, or a URL string when `mime_type` is absent.
        data: String,
        mime_type: String,
    },
    #[serde(rename = "toolCall")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into(), signature: None }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ContentPart::ToolCall { .. })
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            ContentPart::ToolCall { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// `[SUPPLEMENT]` convenience constructors for image content, grounded in
/// `original_source/koda/agent/types.py`'s `ImageInput`.
pub struct ImageInput;

impl ImageInput {
    pub fn from_base64(data: impl Into<String>, mime_type: impl Into<String>) -> ContentPart {
        ContentPart::Image { data: data.into(), mime_type: mime_type.into() }
    }

    pub fn from_url(url: impl Into<String>) -> ContentPart {
        ContentPart::Image { data: url.into(), mime_type: "url".to_string() }
    }
}

/// User-supplied content: a plain string or an ordered text/image sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    pub fn estimated_bytes(&self) -> u64 {
        match self {
            UserContent::Text(s) => s.len() as u64,
            UserContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text, .. } => text.len() as u64,
                    ContentPart::Image { data, .. } => data.len() as u64,
                    _ => 0,
                })
                .sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessage {
    pub content: UserContent,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Copy)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
    pub cost: Cost,
}

impl Usage {
    /// Invariant 3 of spec §3: `total = input + output + cacheRead + cacheWrite`.
    pub fn recompute_total(&mut self) {
        self.total_tokens = self.input + self.output + self.cache_read + self.cache_write;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub content: Vec<ContentPart>,
    pub api: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: i64,
}

impl AssistantMessage {
    pub fn tool_calls(&self) -> Vec<&ContentPart> {
        self.content.iter().filter(|p| p.is_tool_call()).collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|p| p.is_tool_call())
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultMessage {
    pub tool_call_id: String,
    pub tool_name: String,
    pub content: Vec<ContentPart>,
    pub is_error: bool,
    pub timestamp: i64,
}

impl ToolResultMessage {
    pub fn text(&self, text: impl Into<String>, is_error: bool) -> Self {
        ToolResultMessage {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            content: vec![ContentPart::text(text)],
            is_error,
            timestamp: self.timestamp,
        }
    }
}

/// The one message wrapper type. Resolves spec §9's ambiguity about two
/// overlapping `AgentMessage` concepts in the original source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    pub fn user(text: impl Into<String>, timestamp: i64) -> Self {
        Message::User(UserMessage { content: UserContent::Text(text.into()), timestamp })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::ToolResult(_))
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn estimated_tokens(&self) -> u64 {
        estimate_message_tokens(self)
    }
}

/// Tool descriptor: what the model sees. Handler and confirmation flag are
/// bound at registration time (see `tools.rs`), not part of this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Context {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDescriptor>,
}

impl Context {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self { system_prompt, messages: Vec::new(), tools: None, model: None }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SupportedInput {
    Text,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDescriptor {
    pub id: String,
    pub provider: String,
    pub api: String,
    pub base_url: String,
    pub context_window: u64,
    pub max_tokens: u32,
    pub cost_input_per_million: f64,
    pub cost_output_per_million: f64,
    pub cost_cache_read_per_million: f64,
    pub cost_cache_write_per_million: f64,
    pub supported_inputs: Vec<SupportedInput>,
    pub supports_reasoning: bool,
    pub supports_cache_retention: bool,
}

/// `[SUPPLEMENT]` coarse reasoning-budget levels mapped to token budgets,
/// grounded in `original_source/koda/agent/types.py`'s `ThinkingBudget`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingBudget {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl ThinkingBudget {
    pub fn token_budget(self) -> u32 {
        match self {
            ThinkingBudget::Minimal => 1024,
            ThinkingBudget::Low => 4096,
            ThinkingBudget::Medium => 16384,
            ThinkingBudget::High => 65536,
            ThinkingBudget::Xhigh => 131072,
        }
    }
}

/// §4.B token estimator: ~4 bytes of UTF-8 text per token, ~20 bytes per
/// token for image data, plus a small per-message overhead. This is a
/// budget heuristic only — the authoritative count comes back in `Usage`
/// from the provider (spec §4.B, §9).
const PER_MESSAGE_OVERHEAD_TOKENS: u64 = 4;
const TEXT_BYTES_PER_TOKEN: u64 = 4;
const IMAGE_BYTES_PER_TOKEN: u64 = 20;

pub fn estimate_tokens_for_text(text: &str) -> u64 {
    (text.len() as u64).div_ceil(TEXT_BYTES_PER_TOKEN)
}

fn estimate_content_part_tokens(part: &ContentPart) -> u64 {
    match part {
        ContentPart::Text { text, .. } => estimate_tokens_for_text(text),
        ContentPart::Thinking { thinking, .. } => estimate_tokens_for_text(thinking),
        ContentPart::Image { data, .. } => (data.len() as u64).div_ceil(IMAGE_BYTES_PER_TOKEN),
        ContentPart::ToolCall { name, arguments, .. } => {
            estimate_tokens_for_text(name) + estimate_tokens_for_text(&arguments.to_string())
        }
    }
}

pub fn estimate_message_tokens(message: &Message) -> u64 {
    let body = match message {
        Message::User(u) => match &u.content {
            UserContent::Text(t) => estimate_tokens_for_text(t),
            UserContent::Parts(parts) => parts.iter().map(estimate_content_part_tokens).sum(),
        },
        Message::Assistant(a) => a.content.iter().map(estimate_content_part_tokens).sum(),
        Message::ToolResult(t) => t.content.iter().map(estimate_content_part_tokens).sum(),
    };
    body + PER_MESSAGE_OVERHEAD_TOKENS
}

pub fn estimate_context_tokens(context: &Context) -> u64 {
    let system = context
        .system_prompt
        .as_deref()
        .map(estimate_tokens_for_text)
        .unwrap_or(0);
    system + context.messages.iter().map(estimate_message_tokens).sum::<u64>()
}

/// Arbitrary free-form metadata carried by a `ToolDescriptor`'s registration
/// record but not advertised to the model (used by `tools.rs`).
pub type Metadata = HashMap<String, serde_json::Value>;
