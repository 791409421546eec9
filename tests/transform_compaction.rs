//! Integration coverage of §4.F context compaction, including the
//! "compaction preserves pairing" property: a tool-call/tool-result pair must
//! never be split across the kept/dropped boundary.

mod support;

use agent_kernel::message::{estimate_context_tokens, ContentPart, Context, Message, StopReason, ToolResultMessage, Usage};
use agent_kernel::transform::{transform_context, TransformConfig, TransformStrategy};
use serde_json::json;
use support::stub_model;

fn assistant_tool_call(id: &str, name: &str) -> agent_kernel::message::AssistantMessage {
    agent_kernel::message::AssistantMessage {
        content: vec![ContentPart::ToolCall { id: id.into(), name: name.into(), arguments: json!({}), thought_signature: None }],
        api: "stub".into(),
        provider: "stub".into(),
        model: stub_model().id,
        usage: Usage::default(),
        stop_reason: StopReason::ToolUse,
        error_message: None,
        timestamp: 0,
    }
}

fn tool_result(id: &str, name: &str, text: &str) -> Message {
    Message::ToolResult(ToolResultMessage { tool_call_id: id.into(), tool_name: name.into(), content: vec![ContentPart::text(text)], is_error: false, timestamp: 0 })
}

/// Builds a conversation of `pairs` independent user-question /
/// tool-call / tool-result / final-answer turns, each turn padded out with
/// filler text so the whole context comfortably exceeds a small budget.
fn build_context(pairs: usize) -> Context {
    let mut ctx = Context::new(Some("be helpful".into()));
    for i in 0..pairs {
        ctx.push(Message::user(format!("question {i}: {}", "x".repeat(200)), i as i64));
        ctx.push(Message::Assistant(assistant_tool_call(&format!("call-{i}"), "bash")));
        ctx.push(tool_result(&format!("call-{i}"), "bash", &"y".repeat(200)));
    }
    ctx
}

#[test]
fn smart_strategy_keeps_the_most_recent_tool_call_and_its_result_paired() {
    let ctx = build_context(6);
    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 400, target_utilization: 0.5, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&ctx, &config);

    // The context ends with [..., assistant(tool call), tool result]; with
    // `preserve_recent: 2` both halves of that pair are always in the kept
    // set, so neither can be dropped without the other.
    let last_two = &ctx.messages[ctx.messages.len() - 2..];
    let kept_tail = &result.context.messages[result.context.messages.len() - 2..];
    assert_eq!(last_two, kept_tail);
    assert!(matches!(kept_tail[0], Message::Assistant(ref a) if a.has_tool_calls()));
    assert!(matches!(kept_tail[1], Message::ToolResult(_)));
}

#[test]
fn smart_strategy_reduces_token_count_when_over_budget() {
    let ctx = build_context(8);
    let original = estimate_context_tokens(&ctx);
    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 500, target_utilization: 0.4, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&ctx, &config);

    assert!(result.new_tokens < original);
    assert_eq!(result.original_tokens, original);
    assert!(result.messages_removed > 0);
}

#[test]
fn below_budget_context_is_never_touched() {
    let ctx = build_context(1);
    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 1_000_000, target_utilization: 0.9, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&ctx, &config);
    assert_eq!(result.messages_removed, 0);
    assert_eq!(result.context, ctx);
}

#[test]
fn truncate_strategy_never_drops_below_min_messages() {
    let ctx = build_context(10);
    let config = TransformConfig { strategy: TransformStrategy::Truncate, max_tokens: 1, target_utilization: 1.0, preserve_recent: 0, min_messages: 4 };
    let result = transform_context(&ctx, &config);
    assert!(result.context.messages.len() >= 4);
}

#[test]
fn compact_strategy_keeps_every_message_but_shrinks_long_ones() {
    let ctx = build_context(5);
    let original_count = ctx.messages.len();
    let config = TransformConfig { strategy: TransformStrategy::Compact, max_tokens: 1, target_utilization: 1.0, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&ctx, &config);
    assert_eq!(result.context.messages.len(), original_count);
    assert!(result.new_tokens < result.original_tokens);
}

/// Every tool-call id that appears in an assistant message's content must
/// have a matching `ToolResultMessage` present too, and vice versa — a
/// compaction that keeps one half of a pair while dropping the other
/// produces an invalid context no provider would accept.
fn assert_no_split_pairs(messages: &[Message]) {
    let mut call_ids = std::collections::HashSet::new();
    let mut result_ids = std::collections::HashSet::new();
    for message in messages {
        match message {
            Message::Assistant(a) => {
                for part in &a.content {
                    if let Some(id) = part.tool_call_id() {
                        call_ids.insert(id.to_string());
                    }
                }
            }
            Message::ToolResult(t) => {
                result_ids.insert(t.tool_call_id.clone());
            }
            Message::User(_) => {}
        }
    }
    assert_eq!(call_ids, result_ids, "every tool call must keep its matching tool result, and vice versa");
}

#[test]
fn smart_strategy_never_splits_a_tool_pair_scattered_through_the_middle_of_a_long_conversation() {
    // Six independent tool-call/tool-result pairs, none of them trailing
    // (there's a closing plain user turn after the last pair), so
    // `preserve_recent` only protects the very end — the pruner has to
    // choose among several equally-plausible middle pairs to keep under a
    // tight budget, which is exactly where a per-message (rather than
    // per-pair) admission policy could split one.
    let mut ctx = build_context(6);
    ctx.push(Message::user("one more thing, thanks!", 6));
    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 220, target_utilization: 0.5, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&ctx, &config);

    assert!(result.messages_removed > 0, "the budget must actually force some pruning for this test to be meaningful");
    assert_no_split_pairs(&result.context.messages);
}

#[test]
fn anthropic_adjustment_composes_with_compaction_without_losing_pairing() {
    let ctx = build_context(4);
    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 300, target_utilization: 0.5, preserve_recent: 2, min_messages: 2 };
    let compacted = transform_context(&ctx, &config).context;
    let adjusted = agent_kernel::transform::adjust_for_anthropic(&compacted);

    // Every tool result in the adjusted context must still be followed by a
    // user message (Anthropic's requirement), confirming the placeholder
    // insertion still runs correctly on an already-compacted context.
    for window in adjusted.messages.windows(2) {
        if window[0].is_tool_result() {
            assert!(matches!(window[1], Message::User(_)), "tool result must be followed by a user message");
        }
    }
}
