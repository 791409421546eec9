//! Integration coverage of §4.A's event grammar and `event::collect`,
//! exercised through scripted event sequences rather than `event.rs`'s own
//! inline unit tests.

mod support;

use agent_kernel::event::{collect, StreamEventKind};
use agent_kernel::message::ContentPart;
use serde_json::json;
use support::{error_response, parallel_tool_call_response, text_response, tool_call_response};

fn kinds(events: &[agent_kernel::event::StreamEvent]) -> Vec<StreamEventKind> {
    events.iter().map(StreamEventKind::from).collect()
}

#[test]
fn text_response_obeys_the_grammar() {
    let events = text_response("hello");
    assert!(agent_kernel::event::validate_grammar(&kinds(&events)).is_ok());
}

#[test]
fn tool_call_response_obeys_the_grammar() {
    let events = tool_call_response("call-1", "bash", json!({"command": "ls"}));
    assert!(agent_kernel::event::validate_grammar(&kinds(&events)).is_ok());
}

#[test]
fn parallel_tool_call_response_obeys_the_grammar_for_every_content_index() {
    let events = parallel_tool_call_response(&[
        ("call-1", "bash", json!({"command": "ls"})),
        ("call-2", "bash", json!({"command": "pwd"})),
    ]);
    assert!(agent_kernel::event::validate_grammar(&kinds(&events)).is_ok());
}

#[test]
fn error_immediately_after_start_obeys_the_grammar() {
    let events = error_response("upstream exploded");
    assert!(agent_kernel::event::validate_grammar(&kinds(&events)).is_ok());
}

#[test]
fn a_part_that_never_closes_is_rejected() {
    let events = vec![StreamEventKind::Start, StreamEventKind::TextStart, StreamEventKind::Done];
    assert!(agent_kernel::event::validate_grammar(&events).is_err());
}

fn stream_of(events: Vec<agent_kernel::event::StreamEvent>) -> agent_kernel::event::EventStream {
    Box::pin(tokio_stream::iter(events.into_iter().map(Ok)))
}

#[tokio::test]
async fn collect_reconstructs_plain_text() {
    let message = collect(stream_of(text_response("hello there"))).await.unwrap();
    assert_eq!(message.text(), "hello there");
    assert!(!message.has_tool_calls());
}

#[tokio::test]
async fn collect_reconstructs_a_single_tool_call() {
    let message = collect(stream_of(tool_call_response("call-1", "bash", json!({"command": "ls"})))).await.unwrap();
    let calls = message.tool_calls();
    assert_eq!(calls.len(), 1);
    match calls[0] {
        ContentPart::ToolCall { id, name, arguments, .. } => {
            assert_eq!(id, "call-1");
            assert_eq!(name, "bash");
            assert_eq!(arguments["command"], "ls");
        }
        other => panic!("expected a tool call, got {other:?}"),
    }
}

#[tokio::test]
async fn collect_preserves_content_index_order_across_parallel_tool_calls() {
    let message = collect(stream_of(parallel_tool_call_response(&[
        ("call-1", "bash", json!({"command": "ls"})),
        ("call-2", "bash", json!({"command": "pwd"})),
        ("call-3", "bash", json!({"command": "whoami"})),
    ])))
    .await
    .unwrap();

    let ids: Vec<&str> = message.tool_calls().into_iter().filter_map(ContentPart::tool_call_id).collect();
    assert_eq!(ids, vec!["call-1", "call-2", "call-3"]);
}

#[tokio::test]
async fn collect_surfaces_an_error_event_with_no_prior_start_as_a_protocol_error() {
    let events = vec![agent_kernel::event::StreamEvent::Error {
        reason: agent_kernel::message::StopReason::Error,
        error_message: "no start ever arrived".into(),
    }];
    let err = collect(stream_of(events)).await.unwrap_err();
    assert!(matches!(err, agent_kernel::AgentError::ProviderProtocol(_)));
}

#[tokio::test]
async fn collect_attaches_an_error_event_after_start_to_the_partial_message() {
    let message = collect(stream_of(error_response("mid-stream failure"))).await.unwrap();
    assert_eq!(message.error_message.as_deref(), Some("mid-stream failure"));
    assert_eq!(message.stop_reason, agent_kernel::message::StopReason::Error);
}
