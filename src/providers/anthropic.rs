//! Anthropic Messages API provider, grounded in `llm::anthropic::AnthropicProvider`'s
//! SSE consumption but re-targeted at the shared `Provider` trait: instead of
//! reassembling one cumulative `StreamChunk::Content` string, each SSE event
//! is translated directly into the granular `StreamEvent` grammar so callers
//! get per-content-index deltas rather than a flattened string.

use crate::error::AgentError;
use crate::event::{EventStream, StreamEvent};
use crate::message::{
    AssistantMessage, Context, ContentPart, Message, ModelDescriptor, StopReason, ToolDescriptor,
    Usage, UserContent,
};
use crate::provider::{Provider, StreamOptions};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelDescriptor,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: ModelDescriptor) -> Self {
        Self { client: reqwest::Client::new(), api_key: api_key.into(), model }
    }

    fn convert_context(context: &Context) -> (Vec<AnthropicMessage>, Option<AnthropicSystemPrompt>) {
        let system = context.system_prompt.clone().map(AnthropicSystemPrompt::Text);
        let mut messages = Vec::with_capacity(context.messages.len());

        for message in &context.messages {
            match message {
                Message::User(user) => {
                    let content = match &user.content {
                        UserContent::Text(text) => AnthropicContent::Text(text.clone()),
                        UserContent::Parts(parts) => {
                            AnthropicContent::Blocks(parts.iter().map(Self::content_block).collect())
                        }
                    };
                    messages.push(AnthropicMessage { role: "user".into(), content });
                }
                Message::Assistant(assistant) => {
                    let blocks: Vec<_> = assistant.content.iter().map(Self::content_block).collect();
                    messages.push(AnthropicMessage { role: "assistant".into(), content: AnthropicContent::Blocks(blocks) });
                }
                Message::ToolResult(result) => {
                    let text = result
                        .content
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text, .. } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("");
                    messages.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                            tool_use_id: result.tool_call_id.clone(),
                            content: text,
                            is_error: Some(result.is_error),
                        }]),
                    });
                }
            }
        }

        (messages, system)
    }

    fn content_block(part: &ContentPart) -> AnthropicContentBlock {
        match part {
            ContentPart::Text { text, .. } => AnthropicContentBlock::Text { text: text.clone() },
            ContentPart::Thinking { thinking, .. } => AnthropicContentBlock::Thinking { thinking: thinking.clone() },
            ContentPart::Image { data, mime_type } => AnthropicContentBlock::Image {
                source: ImageSource {
                    source_type: if mime_type == "url" { "url".into() } else { "base64".into() },
                    media_type: if mime_type == "url" { None } else { Some(mime_type.clone()) },
                    data: if mime_type == "url" { None } else { Some(data.clone()) },
                    url: if mime_type == "url" { Some(data.clone()) } else { None },
                },
            },
            ContentPart::ToolCall { id, name, arguments, .. } => {
                AnthropicContentBlock::ToolUse { id: id.clone(), name: name.clone(), input: arguments.clone() }
            }
        }
    }

    fn convert_tools(tools: &[ToolDescriptor]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool { name: t.name.clone(), description: Some(t.description.clone()), input_schema: t.parameters.clone() })
            .collect()
    }

    fn parse_stop_reason(reason: Option<&str>) -> StopReason {
        match reason {
            Some("end_turn") | Some("stop_sequence") => StopReason::Stop,
            Some("max_tokens") => StopReason::Length,
            Some("tool_use") => StopReason::ToolUse,
            _ => StopReason::Stop,
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: String) -> AgentError {
        match status.as_u16() {
            401 | 403 => AgentError::AuthenticationFailed,
            429 => AgentError::RateLimitExceeded,
            _ => AgentError::ProviderTransport(format!("anthropic HTTP {status}: {body}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BlockKind {
    Text,
    Thinking,
    ToolCall,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn api_type(&self) -> &str {
        "anthropic-messages"
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    async fn stream(&self, context: &Context, options: &StreamOptions) -> Result<EventStream, AgentError> {
        let (messages, system) = Self::convert_context(context);
        let tools = context.tools.as_ref().map(|t| Self::convert_tools(t));
        let thinking = options.reasoning.map(|budget| AnthropicThinking {
            thinking_type: "enabled".into(),
            budget_tokens: Some(budget.token_budget()),
        });

        let body = CreateMessageRequest {
            model: self.model.id.clone(),
            max_tokens: options.max_tokens.unwrap_or(self.model.max_tokens),
            messages,
            system,
            temperature: options.temperature.or(Some(1.0)),
            stream: Some(true),
            tool_choice: tools.as_ref().map(|_| AnthropicToolChoice::Auto),
            tools,
            thinking,
        };

        let mut request = self
            .client
            .post(format!("{ANTHROPIC_API_BASE}/messages"))
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        for (key, value) in &options.headers {
            request = request.header(key, value);
        }

        let response = request.json(&body).send().await.map_err(AgentError::Network)?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, text));
        }

        let provider_id = self.provider_id().to_string();
        let model_id = self.model.id.clone();
        let event_stream = response.bytes_stream().eventsource();

        let output = async_stream::stream! {
            futures::pin_mut!(event_stream);

            yield Ok(StreamEvent::Start {
                partial: AssistantMessage {
                    content: Vec::new(),
                    api: "anthropic-messages".into(),
                    provider: provider_id.clone(),
                    model: model_id.clone(),
                    usage: Usage::default(),
                    stop_reason: StopReason::Stop,
                    error_message: None,
                    timestamp: chrono::Utc::now().timestamp(),
                },
            });

            let mut index_kind: HashMap<usize, BlockKind> = HashMap::new();
            let mut tool_json: HashMap<usize, String> = HashMap::new();
            let mut usage = Usage::default();
            let mut stop_reason = StopReason::Stop;

            while let Some(event_result) = event_stream.next().await {
                let event = match event_result {
                    Ok(e) => e,
                    Err(err) => {
                        yield Err(AgentError::ProviderTransport(err.to_string()));
                        return;
                    }
                };

                if event.event == "message_stop" {
                    break;
                }
                if event.data.trim().is_empty() {
                    continue;
                }

                match event.event.as_str() {
                    "message_start" => {
                        if let Ok(start) = serde_json::from_str::<MessageStart>(&event.data) {
                            usage.input = start.message.usage.input_tokens as u64;
                            usage.cache_read = start.message.usage.cache_read_input_tokens.unwrap_or(0) as u64;
                            usage.cache_write = start.message.usage.cache_creation_input_tokens.unwrap_or(0) as u64;
                        }
                    }
                    "content_block_start" => {
                        if let Ok(start) = serde_json::from_str::<ContentBlockStart>(&event.data) {
                            match start.content_block {
                                AnthropicContentBlock::Text { .. } => {
                                    index_kind.insert(start.index, BlockKind::Text);
                                    yield Ok(StreamEvent::TextStart { content_index: start.index });
                                }
                                AnthropicContentBlock::Thinking { .. } => {
                                    index_kind.insert(start.index, BlockKind::Thinking);
                                    yield Ok(StreamEvent::ThinkingStart { content_index: start.index });
                                }
                                AnthropicContentBlock::ToolUse { id, name, .. } => {
                                    index_kind.insert(start.index, BlockKind::ToolCall);
                                    tool_json.insert(start.index, String::new());
                                    yield Ok(StreamEvent::ToolcallStart { content_index: start.index, id, name });
                                }
                                _ => {}
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&event.data) {
                            match delta.delta {
                                ContentDelta::TextDelta { text } => {
                                    yield Ok(StreamEvent::TextDelta { content_index: delta.index, delta: text });
                                }
                                ContentDelta::ThinkingDelta { thinking } => {
                                    yield Ok(StreamEvent::ThinkingDelta { content_index: delta.index, delta: thinking });
                                }
                                ContentDelta::InputJsonDelta { partial_json } => {
                                    if let Some(buf) = tool_json.get_mut(&delta.index) {
                                        buf.push_str(&partial_json);
                                    }
                                    yield Ok(StreamEvent::ToolcallDelta { content_index: delta.index, delta: partial_json });
                                }
                                ContentDelta::SignatureDelta { .. } => {}
                            }
                        }
                    }
                    "content_block_stop" => {
                        if let Ok(stop) = serde_json::from_str::<ContentBlockStop>(&event.data) {
                            match index_kind.get(&stop.index) {
                                Some(BlockKind::Text) => {
                                    yield Ok(StreamEvent::TextEnd { content_index: stop.index, signature: None });
                                }
                                Some(BlockKind::Thinking) => {
                                    yield Ok(StreamEvent::ThinkingEnd { content_index: stop.index, signature: None });
                                }
                                Some(BlockKind::ToolCall) => {
                                    let buf = tool_json.remove(&stop.index).unwrap_or_default();
                                    let arguments = serde_json::from_str(&buf).unwrap_or(serde_json::json!({}));
                                    yield Ok(StreamEvent::ToolcallEnd { content_index: stop.index, arguments });
                                }
                                None => {}
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(msg_delta) = serde_json::from_str::<MessageDelta>(&event.data) {
                            stop_reason = Self::parse_stop_reason(msg_delta.delta.stop_reason.as_deref());
                            if let Some(u) = msg_delta.usage {
                                usage.output = u.output_tokens as u64;
                            }
                        }
                    }
                    _ => {}
                }
            }

            usage.recompute_total();
            yield Ok(StreamEvent::Done { reason: stop_reason, usage });
        };

        Ok(Box::pin(output))
    }
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<AnthropicSystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
enum AnthropicSystemPrompt {
    Text(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
enum AnthropicToolChoice {
    #[serde(rename = "auto")]
    Auto,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct AnthropicThinking {
    #[serde(rename = "type")]
    thinking_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartContent,
}

#[derive(Debug, Deserialize)]
struct MessageStartContent {
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: AnthropicContentBlock,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: ContentDelta,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStop {
    index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<AnthropicUsageDelta>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsageDelta {
    output_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
struct AnthropicUsage {
    input_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_read_input_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SupportedInput, UserMessage};

    fn demo_model() -> ModelDescriptor {
        ModelDescriptor {
            id: "claude-sonnet-4-5-20250929".into(),
            provider: "anthropic".into(),
            api: "anthropic-messages".into(),
            base_url: ANTHROPIC_API_BASE.into(),
            context_window: 200_000,
            max_tokens: 8192,
            cost_input_per_million: 3.0,
            cost_output_per_million: 15.0,
            cost_cache_read_per_million: 0.3,
            cost_cache_write_per_million: 3.75,
            supported_inputs: vec![SupportedInput::Text, SupportedInput::Image],
            supports_reasoning: true,
            supports_cache_retention: true,
        }
    }

    #[test]
    fn converts_user_and_tool_result_messages() {
        let mut context = Context::new(Some("be terse".into()));
        context.push(Message::User(UserMessage { content: UserContent::Text("hi".into()), timestamp: 0 }));
        let (messages, system) = AnthropicProvider::convert_context(&context);
        assert_eq!(messages.len(), 1);
        assert!(matches!(system, Some(AnthropicSystemPrompt::Text(s)) if s == "be terse"));
    }

    #[test]
    fn maps_stop_reasons() {
        assert_eq!(AnthropicProvider::parse_stop_reason(Some("end_turn")), StopReason::Stop);
        assert_eq!(AnthropicProvider::parse_stop_reason(Some("max_tokens")), StopReason::Length);
        assert_eq!(AnthropicProvider::parse_stop_reason(Some("tool_use")), StopReason::ToolUse);
    }

    #[test]
    fn provider_reports_model_descriptor() {
        let provider = AnthropicProvider::new("key", demo_model());
        assert_eq!(provider.provider_id(), "anthropic");
        assert!(provider.supports_vision());
        assert!(provider.supports_thinking_level());
    }
}
