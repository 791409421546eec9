//! OpenAI Chat Completions provider, grounded in `llm::openai::OpenAIProvider`.
//!
//! OpenAI's wire format has no explicit `*_start`/`*_end` framing the way
//! Anthropic's SSE does — a text delta just starts arriving, and a tool call
//! delta's first chunk carries an `id` with no "start" marker. This adapter
//! synthesizes the §4.A grammar's missing start/end events: a content index
//! is allocated the first time a text or tool-call delta appears for it, and
//! the close event is synthesized once the stream or a `finish_reason` says
//! that slot is done.

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

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: ModelDescriptor,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>, model: ModelDescriptor) -> Self {
        Self { client: reqwest::Client::new(), api_key: api_key.into(), model }
    }

    fn convert_context(context: &Context) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(context.messages.len() + 1);
        if let Some(system) = &context.system_prompt {
            messages.push(ChatMessage::System { content: system.clone() });
        }

        for message in &context.messages {
            match message {
                Message::User(user) => messages.push(ChatMessage::User { content: Self::user_content(&user.content) }),
                Message::Assistant(assistant) => {
                    let text = assistant.text();
                    let tool_calls: Vec<_> = assistant
                        .tool_calls()
                        .into_iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall { id, name, arguments, .. } => Some(OpenAIToolCall {
                                id: id.clone(),
                                tool_type: "function".into(),
                                function: OpenAIFunctionCall { name: name.clone(), arguments: arguments.to_string() },
                            }),
                            _ => None,
                        })
                        .collect();
                    messages.push(ChatMessage::Assistant {
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    });
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
                    messages.push(ChatMessage::Tool { content: text, tool_call_id: result.tool_call_id.clone() });
                }
            }
        }

        messages
    }

    fn user_content(content: &UserContent) -> UserWireContent {
        match content {
            UserContent::Text(text) => UserWireContent::Text(text.clone()),
            UserContent::Parts(parts) => UserWireContent::Parts(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text, .. } => Some(UserWirePart::Text { text: text.clone() }),
                        ContentPart::Image { data, mime_type } => Some(UserWirePart::ImageUrl {
                            image_url: ImageUrlField {
                                url: if mime_type == "url" { data.clone() } else { format!("data:{mime_type};base64,{data}") },
                            },
                        }),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    fn convert_tools(tools: &[ToolDescriptor]) -> Vec<OpenAITool> {
        tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: "function".into(),
                function: OpenAIFunction { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() },
            })
            .collect()
    }

    fn parse_stop_reason(reason: &str) -> StopReason {
        match reason {
            "stop" => StopReason::Stop,
            "length" => StopReason::Length,
            "tool_calls" => StopReason::ToolUse,
            "content_filter" => StopReason::Error,
            _ => StopReason::Stop,
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: String) -> AgentError {
        match status.as_u16() {
            401 | 403 => AgentError::AuthenticationFailed,
            429 => AgentError::RateLimitExceeded,
            _ => AgentError::ProviderTransport(format!("openai HTTP {status}: {body}")),
        }
    }
}

struct ToolState {
    content_index: usize,
    buffer: String,
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn api_type(&self) -> &str {
        "openai-chat-completions"
    }

    fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    async fn stream(&self, context: &Context, options: &StreamOptions) -> Result<EventStream, AgentError> {
        let messages = Self::convert_context(context);
        let tools = context.tools.as_ref().map(|t| Self::convert_tools(t));

        let body = ChatCompletionRequest {
            model: self.model.id.clone(),
            messages,
            temperature: if tools.is_some() { None } else { options.temperature },
            max_completion_tokens: options.max_tokens.or(Some(self.model.max_tokens)),
            stream: true,
            stream_options: Some(StreamOptionsWire { include_usage: true }),
            tools,
        };

        let mut request = self
            .client
            .post(format!("{OPENAI_API_BASE}/chat/completions"))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");
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
                    api: "openai-chat-completions".into(),
                    provider: provider_id.clone(),
                    model: model_id.clone(),
                    usage: Usage::default(),
                    stop_reason: StopReason::Stop,
                    error_message: None,
                    timestamp: chrono::Utc::now().timestamp(),
                },
            });

            let mut next_index = 0usize;
            let mut text_index: Option<usize> = None;
            let mut tool_states: HashMap<usize, ToolState> = HashMap::new();
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

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                    Ok(c) => c,
                    Err(err) => {
                        yield Err(AgentError::ProviderProtocol(format!("malformed chunk: {err}")));
                        return;
                    }
                };

                if chunk.choices.is_empty() {
                    if let Some(u) = chunk.usage {
                        usage.input = u.prompt_tokens as u64;
                        usage.output = u.completion_tokens as u64;
                    }
                    continue;
                }

                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        let index = match text_index {
                            Some(i) => i,
                            None => {
                                let i = next_index;
                                next_index += 1;
                                text_index = Some(i);
                                yield Ok(StreamEvent::TextStart { content_index: i });
                                i
                            }
                        };
                        yield Ok(StreamEvent::TextDelta { content_index: index, delta: content });
                    }

                    if let Some(tool_calls) = choice.delta.tool_calls {
                        for delta in tool_calls {
                            if let Some(id) = delta.id.clone() {
                                let index = next_index;
                                next_index += 1;
                                let name = delta.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
                                tool_states.insert(delta.index, ToolState { content_index: index, buffer: String::new() });
                                yield Ok(StreamEvent::ToolcallStart { content_index: index, id, name });
                            }
                            if let Some(state) = tool_states.get_mut(&delta.index) {
                                if let Some(args) = delta.function.as_ref().and_then(|f| f.arguments.clone()) {
                                    state.buffer.push_str(&args);
                                    yield Ok(StreamEvent::ToolcallDelta { content_index: state.content_index, delta: args });
                                }
                            }
                        }
                    }

                    if let Some(finish_reason) = choice.finish_reason {
                        stop_reason = Self::parse_stop_reason(&finish_reason);
                    }
                }
            }

            if let Some(index) = text_index {
                yield Ok(StreamEvent::TextEnd { content_index: index, signature: None });
            }
            for (_, state) in tool_states {
                let arguments = serde_json::from_str(&state.buffer).unwrap_or(serde_json::json!({}));
                yield Ok(StreamEvent::ToolcallEnd { content_index: state.content_index, arguments });
            }

            usage.recompute_total();
            yield Ok(StreamEvent::Done { reason: stop_reason, usage });
        };

        Ok(Box::pin(output))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptionsWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
}

#[derive(Debug, Serialize)]
struct StreamOptionsWire {
    include_usage: bool,
}

#[derive(Debug, Serialize, Clone)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize, Clone)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: UserWireContent },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAIToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool { content: String, tool_call_id: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
enum UserWireContent {
    Text(String),
    Parts(Vec<UserWirePart>),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
enum UserWirePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrlField },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ImageUrlField {
    url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
