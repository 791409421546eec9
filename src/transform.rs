//! §4.F context transformer/compactor, grounded in
//! `original_source/koda/agent/transform.py`.
//!
//! `Summarize` from the original is dropped: it was never implemented there
//! beyond an unused enum variant, and spec.md names only Smart/Truncate/
//! Compact. Provider adjustment (`for_anthropic`/`for_openai_compat`) always
//! returns a new `Context` — the original mutated `ToolCall.id` in place on
//! the caller's own message list, which this crate treats as a bug rather
//! than a quirk to preserve.

use crate::message::{estimate_message_tokens, ContentPart, Context, Message, UserContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStrategy {
    Smart,
    Truncate,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub strategy: TransformStrategy,
    pub max_tokens: u64,
    pub target_utilization: f64,
    pub preserve_recent: usize,
    pub min_messages: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            strategy: TransformStrategy::Smart,
            max_tokens: 128_000,
            target_utilization: 0.75,
            preserve_recent: 4,
            min_messages: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformResult {
    pub context: Context,
    pub original_tokens: u64,
    pub new_tokens: u64,
    pub tokens_saved: u64,
    pub messages_removed: usize,
    pub strategy_used: TransformStrategy,
}

/// Apply `config.strategy` if the context is already over its target
/// budget; otherwise return it unchanged and report zero savings.
pub fn transform_context(context: &Context, config: &TransformConfig) -> TransformResult {
    let original_tokens = crate::message::estimate_context_tokens(context);
    let target_tokens = (config.max_tokens as f64 * config.target_utilization) as u64;

    if original_tokens <= target_tokens {
        return TransformResult {
            context: context.clone(),
            original_tokens,
            new_tokens: original_tokens,
            tokens_saved: 0,
            messages_removed: 0,
            strategy_used: config.strategy,
        };
    }

    let transformed = match config.strategy {
        TransformStrategy::Smart => smart_prune(context, target_tokens, config),
        TransformStrategy::Truncate => truncate_prune(context, target_tokens, config),
        TransformStrategy::Compact => compact_prune(context),
    };

    let new_tokens = crate::message::estimate_context_tokens(&transformed);
    TransformResult {
        original_tokens,
        new_tokens,
        tokens_saved: original_tokens.saturating_sub(new_tokens),
        messages_removed: context.messages.len() - transformed.messages.len(),
        strategy_used: config.strategy,
        context: transformed,
    }
}

/// Prioritize recent messages, then messages by importance score, dropping
/// the rest until the context fits `target_tokens`.
///
/// Messages are scored and admitted in groups, not individually: an
/// assistant message's tool calls and the tool-result messages that answer
/// them form one group, so a tool result is never kept with its call
/// dropped (or the reverse) — every group is admitted or dropped as a
/// whole.
fn smart_prune(context: &Context, target_tokens: u64, config: &TransformConfig) -> Context {
    let messages = &context.messages;
    if messages.len() <= config.min_messages {
        return context.clone();
    }

    let total = messages.len();
    let groups = group_by_tool_pairing(messages);

    let mut scored: Vec<(f64, usize)> = groups.iter().enumerate().map(|(g, members)| (group_importance(members, messages, total), g)).collect();
    // Descending by score, ties broken by group index ascending (stable sort on index first).
    scored.sort_by(|a, b| a.1.cmp(&b.1));
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let recent_indices: std::collections::HashSet<usize> = (0..config.preserve_recent.min(total)).map(|i| total - 1 - i).collect();
    let mut kept_groups = std::collections::HashSet::new();
    for (g, members) in groups.iter().enumerate() {
        if members.iter().any(|i| recent_indices.contains(i)) {
            kept_groups.insert(g);
        }
    }

    let mut current_tokens: u64 = kept_groups.iter().flat_map(|&g| &groups[g]).map(|&i| estimate_message_tokens(&messages[i])).sum();
    for (_, g) in &scored {
        if kept_groups.contains(g) {
            continue;
        }
        let group_tokens: u64 = groups[*g].iter().map(|&i| estimate_message_tokens(&messages[i])).sum();
        if current_tokens + group_tokens <= target_tokens {
            kept_groups.insert(*g);
            current_tokens += group_tokens;
        }
    }

    let mut ordered: Vec<usize> = kept_groups.into_iter().flat_map(|g| groups[g].clone()).collect();
    ordered.sort_unstable();
    let new_messages = ordered.into_iter().map(|i| messages[i].clone()).collect();

    Context { system_prompt: context.system_prompt.clone(), messages: new_messages, tools: context.tools.clone(), model: context.model.clone() }
}

/// Groups an assistant message's tool calls with the tool-result messages
/// that immediately follow and answer them, so the two never get scored or
/// admitted independently. Every other message stays its own singleton
/// group.
fn group_by_tool_pairing(messages: &[Message]) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let mut group = vec![i];
        if let Message::Assistant(a) = &messages[i] {
            let ids: std::collections::HashSet<&str> = a.content.iter().filter_map(|p| p.tool_call_id()).collect();
            let mut j = i + 1;
            while !ids.is_empty() && j < messages.len() {
                match &messages[j] {
                    Message::ToolResult(t) if ids.contains(t.tool_call_id.as_str()) => {
                        group.push(j);
                        j += 1;
                    }
                    _ => break,
                }
            }
            i = j;
        } else {
            i += 1;
        }
        groups.push(group);
    }
    groups
}

/// Recency of the group's last member, scaled to 10, plus the highest role
/// bonus among its members (matching §4.F's table) — a paired tool
/// call/result group scores at least as high as the tool result alone.
fn group_importance(members: &[usize], messages: &[Message], total: usize) -> f64 {
    let last = *members.iter().max().unwrap();
    let recency = (last + 1) as f64 / total as f64;
    let bonus = members.iter().map(|&i| role_bonus(&messages[i])).fold(0.0_f64, f64::max);
    recency * 10.0 + bonus
}

fn role_bonus(msg: &Message) -> f64 {
    match msg {
        Message::User(_) => 5.0,
        Message::Assistant(a) if a.has_tool_calls() => 3.0,
        Message::Assistant(_) => 0.0,
        Message::ToolResult(t) if t.is_error => 3.0,
        Message::ToolResult(_) => 2.0,
    }
}

/// Drop the oldest messages until what remains fits the budget, falling
/// back to `min_messages` if that would leave too few.
fn truncate_prune(context: &Context, target_tokens: u64, config: &TransformConfig) -> Context {
    let messages = &context.messages;
    let mut kept = Vec::new();
    let mut current_tokens: u64 = 0;

    for msg in messages.iter().rev() {
        let msg_tokens = estimate_message_tokens(msg);
        if current_tokens + msg_tokens <= target_tokens {
            kept.push(msg.clone());
            current_tokens += msg_tokens;
        } else {
            break;
        }
    }
    kept.reverse();

    if kept.len() < config.min_messages && messages.len() >= config.min_messages {
        kept = messages[messages.len() - config.min_messages..].to_vec();
    }

    Context { system_prompt: context.system_prompt.clone(), messages: kept, tools: context.tools.clone(), model: context.model.clone() }
}

const COMPACT_MAX_LENGTH: usize = 2000;

/// Keep every message but truncate verbose text content in place.
fn compact_prune(context: &Context) -> Context {
    let messages = context.messages.iter().map(|m| compact_message(m, COMPACT_MAX_LENGTH)).collect();
    Context { system_prompt: context.system_prompt.clone(), messages, tools: context.tools.clone(), model: context.model.clone() }
}

fn truncate_with_ellipsis(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let boundary = (0..=max_length).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
    format!("{}\n...[truncated]", &text[..boundary])
}

fn compact_message(msg: &Message, max_length: usize) -> Message {
    match msg {
        Message::User(u) => {
            let content = match &u.content {
                UserContent::Text(t) if t.len() > max_length => UserContent::Text(truncate_with_ellipsis(t, max_length)),
                other => other.clone(),
            };
            Message::User(crate::message::UserMessage { content, timestamp: u.timestamp })
        }
        Message::Assistant(a) => {
            let content = a
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text, signature } if text.len() > max_length => {
                        ContentPart::Text { text: truncate_with_ellipsis(text, max_length), signature: signature.clone() }
                    }
                    other => other.clone(),
                })
                .collect();
            Message::Assistant(crate::message::AssistantMessage { content, ..a.clone() })
        }
        Message::ToolResult(t) => {
            let content = t
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text, signature } if text.len() > max_length => {
                        ContentPart::Text { text: truncate_with_ellipsis(text, max_length), signature: signature.clone() }
                    }
                    other => other.clone(),
                })
                .collect();
            Message::ToolResult(crate::message::ToolResultMessage { content, ..t.clone() })
        }
    }
}

/// §4.F Anthropic adjustment: Anthropic rejects a `tool_result` block that
/// isn't immediately followed by a user turn, so a placeholder user message
/// is inserted wherever a tool result is followed by anything else. Always
/// returns a fresh `Context`; never mutates `context`.
pub fn adjust_for_anthropic(context: &Context) -> Context {
    let mut adjusted = Vec::with_capacity(context.messages.len());
    let mut last_was_tool_result = false;

    for msg in &context.messages {
        if last_was_tool_result && !msg.is_tool_result() && !matches!(msg, Message::User(_)) {
            adjusted.push(Message::user("Continue.", 0));
        }
        last_was_tool_result = msg.is_tool_result();
        adjusted.push(msg.clone());
    }

    Context { system_prompt: context.system_prompt.clone(), messages: adjusted, tools: context.tools.clone(), model: context.model.clone() }
}

/// §4.F OpenAI-compatible adjustment: some OpenAI-compatible providers (e.g.
/// Mistral) require tool-call IDs to carry a `call_` prefix. Returns a fresh
/// `Context` with rewritten IDs; the caller's context is left untouched.
pub fn adjust_for_openai_compat(context: &Context, provider: &str) -> Context {
    if provider != "mistral" {
        return context.clone();
    }

    let messages = context
        .messages
        .iter()
        .map(|msg| match msg {
            Message::Assistant(a) => {
                let content = a
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::ToolCall { id, name, arguments, thought_signature } if !id.starts_with("call_") => ContentPart::ToolCall {
                            id: format!("call_{id}"),
                            name: name.clone(),
                            arguments: arguments.clone(),
                            thought_signature: thought_signature.clone(),
                        },
                        other => other.clone(),
                    })
                    .collect();
                Message::Assistant(crate::message::AssistantMessage { content, ..a.clone() })
            }
            other => other.clone(),
        })
        .collect();

    Context { system_prompt: context.system_prompt.clone(), messages, tools: context.tools.clone(), model: context.model.clone() }
}

/// Drop non-error tool results beyond `max_results`, always keeping errors.
pub fn filter_tool_results(context: &Context, keep_errors: bool, max_results: Option<usize>) -> Context {
    let mut messages = Vec::with_capacity(context.messages.len());
    let mut kept_results = 0usize;

    for msg in &context.messages {
        match msg {
            Message::ToolResult(t) => {
                if keep_errors && t.is_error {
                    messages.push(msg.clone());
                } else if max_results.map(|max| kept_results < max).unwrap_or(true) {
                    messages.push(msg.clone());
                    kept_results += 1;
                }
            }
            other => messages.push(other.clone()),
        }
    }

    Context { system_prompt: context.system_prompt.clone(), messages, tools: context.tools.clone(), model: context.model.clone() }
}

/// Human-readable transcript for logging/debugging, not sent to any provider.
pub fn extract_text_content(context: &Context) -> String {
    let mut parts = Vec::new();

    if let Some(system) = &context.system_prompt {
        parts.push(format!("[System]\n{system}"));
    }

    for msg in &context.messages {
        match msg {
            Message::User(u) => {
                let text = match &u.content {
                    UserContent::Text(t) => t.clone(),
                    UserContent::Parts(ps) => ps
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text, .. } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join(" "),
                };
                parts.push(format!("[User]\n{text}"));
            }
            Message::Assistant(a) => {
                let text = a
                    .content
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text, .. } => text.clone(),
                        ContentPart::Thinking { thinking, .. } => format!("[thinking: {} chars]", thinking.len()),
                        ContentPart::ToolCall { name, .. } => format!("[tool: {name}]"),
                        ContentPart::Image { .. } => "[image]".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                parts.push(format!("[Assistant]\n{text}"));
            }
            Message::ToolResult(t) => {
                let text = t
                    .content
                    .first()
                    .map(|p| match p {
                        ContentPart::Text { text, .. } => text.as_str(),
                        _ => "",
                    })
                    .unwrap_or("");
                let truncated = if text.len() > 500 { &text[..500.min(text.len())] } else { text };
                parts.push(format!("[Tool: {}]\n{truncated}", t.tool_name));
            }
        }
    }

    parts.join("\n\n")
}
