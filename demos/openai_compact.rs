// Example: compacting a long conversation with `transform::transform_context`
//
// This demonstrates:
// - Building up a `Context` across several turns
// - Running the smart-pruning strategy once it grows past a small budget
// - Comparing token counts and message counts before/after
//
// Run with: cargo run --example openai_compact

use agent_kernel::message::{estimate_context_tokens, AssistantMessage, StopReason, Usage};
use agent_kernel::transform::{transform_context, TransformConfig, TransformStrategy};
use agent_kernel::{Context, Message};

fn assistant_text(text: &str) -> AssistantMessage {
    AssistantMessage {
        content: vec![agent_kernel::message::ContentPart::text(text)],
        api: "openai-chat-completions".into(),
        provider: "openai".into(),
        model: "gpt-5".into(),
        usage: Usage::default(),
        stop_reason: StopReason::Stop,
        error_message: None,
        timestamp: 0,
    }
}

fn main() {
    println!("Conversation compaction example\n");

    let mut context = Context::new(Some("You are a helpful assistant.".into()));
    let pairs = [
        ("What is the capital of France?", "The capital of France is Paris. Paris is not only the capital but also the largest city in France, known for its iconic landmarks like the Eiffel Tower, Louvre Museum, and Notre-Dame Cathedral."),
        ("What about Germany?", "The capital of Germany is Berlin. Berlin became the capital of reunified Germany in 1990 and is the country's largest city, known for its history, cultural scene, and landmarks like the Brandenburg Gate."),
        ("And Italy?", "The capital of Italy is Rome. Rome is one of the oldest continuously inhabited cities in the world, famous for historical sites like the Colosseum, Roman Forum, and Vatican City."),
    ];
    for (i, (question, answer)) in pairs.iter().enumerate() {
        context.push(Message::user(*question, i as i64));
        context.push(Message::Assistant(assistant_text(answer)));
    }

    let original_tokens = estimate_context_tokens(&context);
    println!("Original conversation:");
    println!("  messages: {}", context.messages.len());
    println!("  estimated tokens: {original_tokens}\n");

    let config = TransformConfig { strategy: TransformStrategy::Smart, max_tokens: 40, target_utilization: 0.5, preserve_recent: 2, min_messages: 2 };
    let result = transform_context(&context, &config);

    println!("Compacted conversation:");
    println!("  messages: {}", result.context.messages.len());
    println!("  estimated tokens: {}", result.new_tokens);
    println!("  messages removed: {}", result.messages_removed);
    println!("  tokens saved: {}", result.tokens_saved);
    println!("  strategy used: {:?}", result.strategy_used);
}
