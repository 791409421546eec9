//! 4.A Event protocol & stream.
//!
//! A lazy, finite, single-consumer sequence of typed events that together
//! reconstruct exactly one assistant message, following the grammar:
//! `start (partStream)* (done | error)` where `partStream` is one of
//! `textStart textDelta* textEnd`, `thinkingStart thinkingDelta* thinkingEnd`,
//! or `toolcallStart toolcallDelta* toolcallEnd`. `contentIndex` values are
//! assigned in start order and never reused.

use crate::error::AgentError;
use crate::message::{AssistantMessage, ContentPart, StopReason, Usage};
use futures::{Stream, StreamExt};
use std::pin::Pin;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start { partial: AssistantMessage },
    TextStart { content_index: usize },
    TextDelta { content_index: usize, delta: String },
    TextEnd { content_index: usize, signature: Option<String> },
    ThinkingStart { content_index: usize },
    ThinkingDelta { content_index: usize, delta: String },
    ThinkingEnd { content_index: usize, signature: Option<String> },
    ToolcallStart { content_index: usize, id: String, name: String },
    ToolcallDelta { content_index: usize, delta: String },
    ToolcallEnd { content_index: usize, arguments: serde_json::Value },
    Done { reason: StopReason, usage: Usage },
    Error { reason: StopReason, error_message: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AgentError>> + Send>>;

/// Blocking collector: consumes the stream to completion, replaying deltas
/// into a growing assistant message. Grounded in
/// `original_source/koda/ai/event_stream.py`'s `AssistantMessageEventStream.collect`.
pub async fn collect(mut stream: EventStream) -> Result<AssistantMessage, AgentError> {
    let mut message: Option<AssistantMessage> = None;
    // Tracks the textual buffer accumulated so far for each tool-call
    // content index, used to drive the partial-JSON parser on every delta
    // per spec §4.A ("at each delta, the current buffer is fed to a lenient
    // JSON parser").
    let mut tool_json_buffers: std::collections::HashMap<usize, String> = Default::default();

    while let Some(event) = stream.next().await {
        let event = event?;
        match event {
            StreamEvent::Start { partial } => message = Some(partial),
            StreamEvent::TextStart { content_index } => {
                if let Some(msg) = &mut message {
                    ensure_slot(&mut msg.content, content_index, ContentPart::text(""));
                }
            }
            StreamEvent::TextDelta { content_index, delta } => {
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::Text { text, .. }) = msg.content.get_mut(content_index) {
                        text.push_str(&delta);
                    }
                }
            }
            StreamEvent::TextEnd { content_index, signature } => {
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::Text { signature: sig, .. }) =
                        msg.content.get_mut(content_index)
                    {
                        *sig = signature;
                    }
                }
            }
            StreamEvent::ThinkingStart { content_index } => {
                if let Some(msg) = &mut message {
                    ensure_slot(
                        &mut msg.content,
                        content_index,
                        ContentPart::Thinking { thinking: String::new(), signature: None },
                    );
                }
            }
            StreamEvent::ThinkingDelta { content_index, delta } => {
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::Thinking { thinking, .. }) =
                        msg.content.get_mut(content_index)
                    {
                        thinking.push_str(&delta);
                    }
                }
            }
            StreamEvent::ThinkingEnd { content_index, signature } => {
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::Thinking { signature: sig, .. }) =
                        msg.content.get_mut(content_index)
                    {
                        *sig = signature;
                    }
                }
            }
            StreamEvent::ToolcallStart { content_index, id, name } => {
                if let Some(msg) = &mut message {
                    ensure_slot(
                        &mut msg.content,
                        content_index,
                        ContentPart::ToolCall {
                            id,
                            name,
                            arguments: serde_json::Value::Object(Default::default()),
                            thought_signature: None,
                        },
                    );
                }
                tool_json_buffers.insert(content_index, String::new());
            }
            StreamEvent::ToolcallDelta { content_index, delta } => {
                let buf = tool_json_buffers.entry(content_index).or_default();
                buf.push_str(&delta);
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::ToolCall { arguments, .. }) =
                        msg.content.get_mut(content_index)
                    {
                        if let Some(parsed) = crate::json_parse::parse_streaming_json(buf) {
                            *arguments = parsed;
                        }
                    }
                }
            }
            StreamEvent::ToolcallEnd { content_index, arguments } => {
                if let Some(msg) = &mut message {
                    if let Some(ContentPart::ToolCall { arguments: a, .. }) =
                        msg.content.get_mut(content_index)
                    {
                        *a = arguments;
                    }
                }
                tool_json_buffers.remove(&content_index);
            }
            StreamEvent::Done { reason, usage } => {
                if let Some(msg) = &mut message {
                    msg.stop_reason = reason;
                    msg.usage = usage;
                }
                break;
            }
            StreamEvent::Error { reason, error_message } => {
                if let Some(msg) = &mut message {
                    msg.stop_reason = reason;
                    msg.error_message = Some(error_message.clone());
                } else {
                    return Err(AgentError::ProviderProtocol(error_message));
                }
                break;
            }
        }
    }

    message.ok_or_else(|| AgentError::ProviderProtocol("stream ended before `start`".into()))
}

fn ensure_slot(content: &mut Vec<ContentPart>, index: usize, value: ContentPart) {
    while content.len() <= index {
        content.push(ContentPart::text(""));
    }
    content[index] = value;
}

/// `[SUPPLEMENT]` streaming text-chunk adapter for UI consumers that only
/// want incremental visible text, grounded in
/// `original_source/koda/ai/event_stream.py`'s `stream_to_string`.
pub fn text_chunks(mut stream: EventStream) -> impl Stream<Item = Result<String, AgentError>> {
    async_stream::stream! {
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::TextDelta { delta, .. } => yield Ok(delta),
                StreamEvent::Error { error_message, .. } => {
                    yield Err(AgentError::ProviderProtocol(error_message));
                    return;
                }
                StreamEvent::Done { .. } => return,
                _ => {}
            }
        }
    }
}

/// Validates that a recorded event sequence obeys the §4.A grammar. Used by
/// tests (spec §8 universal property 1) and available to callers that want
/// to assert grammar conformance of a third-party provider adapter.
pub fn validate_grammar(events: &[StreamEventKind]) -> Result<(), String> {
    use StreamEventKind::*;
    let mut iter = events.iter().copied();
    match iter.next() {
        Some(Start) => {}
        other => return Err(format!("expected Start, got {other:?}")),
    }
    let mut open: Option<StreamEventKind> = None;
    for kind in iter {
        match (open, kind) {
            (None, TextStart) => open = Some(TextStart),
            (None, ThinkingStart) => open = Some(ThinkingStart),
            (None, ToolcallStart) => open = Some(ToolcallStart),
            (Some(TextStart), TextDelta) => {}
            (Some(TextStart), TextEnd) => open = None,
            (Some(ThinkingStart), ThinkingDelta) => {}
            (Some(ThinkingStart), ThinkingEnd) => open = None,
            (Some(ToolcallStart), ToolcallDelta) => {}
            (Some(ToolcallStart), ToolcallEnd) => open = None,
            (None, Done) | (None, Error) => return Ok(()),
            (state, kind) => return Err(format!("illegal transition from {state:?} on {kind:?}")),
        }
    }
    Err("stream ended without Done or Error".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    Start,
    TextStart,
    TextDelta,
    TextEnd,
    ThinkingStart,
    ThinkingDelta,
    ThinkingEnd,
    ToolcallStart,
    ToolcallDelta,
    ToolcallEnd,
    Done,
    Error,
}

impl From<&StreamEvent> for StreamEventKind {
    fn from(e: &StreamEvent) -> Self {
        use StreamEventKind as K;
        match e {
            StreamEvent::Start { .. } => K::Start,
            StreamEvent::TextStart { .. } => K::TextStart,
            StreamEvent::TextDelta { .. } => K::TextDelta,
            StreamEvent::TextEnd { .. } => K::TextEnd,
            StreamEvent::ThinkingStart { .. } => K::ThinkingStart,
            StreamEvent::ThinkingDelta { .. } => K::ThinkingDelta,
            StreamEvent::ThinkingEnd { .. } => K::ThinkingEnd,
            StreamEvent::ToolcallStart { .. } => K::ToolcallStart,
            StreamEvent::ToolcallDelta { .. } => K::ToolcallDelta,
            StreamEvent::ToolcallEnd { .. } => K::ToolcallEnd,
            StreamEvent::Done { .. } => K::Done,
            StreamEvent::Error { .. } => K::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(tokio_stream::iter(events.into_iter().map(Ok)))
    }

    fn shell(model: &str) -> AssistantMessage {
        AssistantMessage {
            content: vec![],
            api: "test".into(),
            provider: "test".into(),
            model: model.into(),
            usage: Usage::default(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn collects_plain_text_response() {
        let events = vec![
            StreamEvent::Start { partial: shell("m1") },
            StreamEvent::TextStart { content_index: 0 },
            StreamEvent::TextDelta { content_index: 0, delta: "Hi ".into() },
            StreamEvent::TextDelta { content_index: 0, delta: "there".into() },
            StreamEvent::TextEnd { content_index: 0, signature: None },
            StreamEvent::Done {
                reason: StopReason::Stop,
                usage: Usage { input: 2, output: 2, total_tokens: 4, ..Default::default() },
            },
        ];
        let msg = collect(make_stream(events)).await.unwrap();
        assert_eq!(msg.text(), "Hi there");
        assert_eq!(msg.stop_reason, StopReason::Stop);
    }

    #[tokio::test]
    async fn collects_tool_call_with_incremental_json() {
        let events = vec![
            StreamEvent::Start { partial: shell("m1") },
            StreamEvent::ToolcallStart { content_index: 0, id: "t1".into(), name: "read".into() },
            StreamEvent::ToolcallDelta { content_index: 0, delta: "{\"path\":".into() },
            StreamEvent::ToolcallDelta { content_index: 0, delta: "\"a.txt\"}".into() },
            StreamEvent::ToolcallEnd {
                content_index: 0,
                arguments: serde_json::json!({"path": "a.txt"}),
            },
            StreamEvent::Done { reason: StopReason::ToolUse, usage: Usage::default() },
        ];
        let msg = collect(make_stream(events)).await.unwrap();
        match &msg.content[0] {
            ContentPart::ToolCall { arguments, name, .. } => {
                assert_eq!(name, "read");
                assert_eq!(arguments["path"], "a.txt");
            }
            _ => panic!("expected tool call"),
        }
    }

    #[test]
    fn grammar_validates_well_formed_sequence() {
        let kinds = vec![
            StreamEventKind::Start,
            StreamEventKind::TextStart,
            StreamEventKind::TextDelta,
            StreamEventKind::TextEnd,
            StreamEventKind::Done,
        ];
        assert!(validate_grammar(&kinds).is_ok());
    }

    #[test]
    fn grammar_rejects_interleaved_parts_sharing_index() {
        let kinds = vec![
            StreamEventKind::Start,
            StreamEventKind::TextStart,
            StreamEventKind::ToolcallStart,
            StreamEventKind::Done,
        ];
        assert!(validate_grammar(&kinds).is_err());
    }
}
