//! Shared scripted `Provider` stub for cross-module integration tests.
//! Generalizes the `ScriptedProvider` pattern from `loop_.rs`'s unit tests
//! into something every `tests/*.rs` file can share.

use agent_kernel::event::{EventStream, StreamEvent};
use agent_kernel::message::{AssistantMessage, ModelDescriptor, StopReason, SupportedInput, Usage};
use agent_kernel::provider::{Provider, StreamOptions};
use agent_kernel::{AgentError, Context};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};

pub fn stub_model() -> ModelDescriptor {
    ModelDescriptor {
        id: "stub-1".into(),
        provider: "stub".into(),
        api: "stub".into(),
        base_url: "http://localhost".into(),
        context_window: 128_000,
        max_tokens: 4_096,
        cost_input_per_million: 0.0,
        cost_output_per_million: 0.0,
        cost_cache_read_per_million: 0.0,
        cost_cache_write_per_million: 0.0,
        supported_inputs: vec![SupportedInput::Text],
        supports_reasoning: false,
        supports_cache_retention: false,
    }
}

fn shell() -> AssistantMessage {
    AssistantMessage {
        content: vec![],
        api: "stub".into(),
        provider: "stub".into(),
        model: "stub-1".into(),
        usage: Usage::default(),
        stop_reason: StopReason::Stop,
        error_message: None,
        timestamp: 0,
    }
}

pub fn text_response(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start { partial: shell() },
        StreamEvent::TextStart { content_index: 0 },
        StreamEvent::TextDelta { content_index: 0, delta: text.to_string() },
        StreamEvent::TextEnd { content_index: 0, signature: None },
        StreamEvent::Done { reason: StopReason::Stop, usage: Usage::default() },
    ]
}

pub fn tool_call_response(id: &str, name: &str, arguments: serde_json::Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Start { partial: shell() },
        StreamEvent::ToolcallStart { content_index: 0, id: id.to_string(), name: name.to_string() },
        StreamEvent::ToolcallEnd { content_index: 0, arguments },
        StreamEvent::Done { reason: StopReason::ToolUse, usage: Usage::default() },
    ]
}

pub fn parallel_tool_call_response(calls: &[(&str, &str, serde_json::Value)]) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start { partial: shell() }];
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        events.push(StreamEvent::ToolcallStart { content_index: index, id: id.to_string(), name: name.to_string() });
        events.push(StreamEvent::ToolcallEnd { content_index: index, arguments: arguments.clone() });
    }
    events.push(StreamEvent::Done { reason: StopReason::ToolUse, usage: Usage::default() });
    events
}

pub fn error_response(message: &str) -> Vec<StreamEvent> {
    vec![StreamEvent::Start { partial: shell() }, StreamEvent::Error { reason: StopReason::Error, error_message: message.to_string() }]
}

/// Replays one scripted response per call; past the end of the script it
/// repeats the last entry, or fails every call if `fail_first` many calls
/// should return a transport error before the script starts (used to drive
/// the provider-retry path).
pub struct ScriptedProvider {
    model: ModelDescriptor,
    responses: Vec<Vec<StreamEvent>>,
    fail_first: u32,
    call_count: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Vec<StreamEvent>>) -> Self {
        Self { model: stub_model(), responses, fail_first: 0, call_count: AtomicU32::new(0) }
    }

    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        "stub"
    }
    fn api_type(&self) -> &str {
        "stub"
    }
    fn model(&self) -> &ModelDescriptor {
        &self.model
    }
    async fn stream(&self, _context: &Context, _options: &StreamOptions) -> Result<EventStream, AgentError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(AgentError::RateLimitExceeded);
        }
        let idx = (call - self.fail_first) as usize;
        let events = self.responses[idx.min(self.responses.len() - 1)].clone();
        Ok(Box::pin(tokio_stream::iter(events.into_iter().map(Ok))))
    }
}
