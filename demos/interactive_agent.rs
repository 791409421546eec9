// Example: interactive REPL against an `Agent`
//
// This demonstrates:
// - Persisting a `Context` across turns
// - Printing tool calls and tool results as they happen via `AgentEvent`
// - Steering a running turn is out of scope for a single-threaded REPL;
//   see `loop_detection_demo.rs` for the `AgentEvent` callback shape.
//
// Run with: cargo run --example interactive_agent --features openai

use agent_kernel::message::{ModelDescriptor, SupportedInput};
use agent_kernel::providers::OpenAIProvider;
use agent_kernel::tools::{BashTool, ToolRegistry};
use agent_kernel::{Agent, AgentLoopConfig, Context, Message};
use std::io::{self, Write};
use std::sync::Arc;

fn model() -> ModelDescriptor {
    ModelDescriptor {
        id: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-5-nano".to_string()),
        provider: "openai".into(),
        api: "openai-chat-completions".into(),
        base_url: "https://api.openai.com/v1".into(),
        context_window: 128_000,
        max_tokens: 4_096,
        cost_input_per_million: 0.15,
        cost_output_per_million: 0.6,
        cost_cache_read_per_million: 0.0,
        cost_cache_write_per_million: 0.0,
        supported_inputs: vec![SupportedInput::Text],
        supports_reasoning: false,
        supports_cache_retention: false,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY environment variable not set");

    let provider = Arc::new(OpenAIProvider::new(api_key, model()));
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(BashTool::new().with_timeout(30)));
    let agent = Agent::new(provider, Arc::new(tools), AgentLoopConfig::default());

    println!("Interactive agent. Type 'exit' or 'quit' to stop.\n");

    let mut context = Context::new(Some("You are a helpful assistant with shell access.".into()));
    let mut turn = 0;

    loop {
        turn += 1;
        print!("\n[{turn}] you> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        if input.is_empty() {
            turn -= 1;
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("goodbye");
            break;
        }

        context.push(Message::user(input, now_ms()));

        let on_event = |event: agent_kernel::loop_::AgentEvent| {
            use agent_kernel::loop_::AgentEvent::*;
            match event {
                ToolResult { tool_name, is_error, .. } => {
                    println!("  tool `{tool_name}` {}", if is_error { "failed" } else { "ok" });
                }
                TurnEnd { iteration, steered, follow_up } if steered || follow_up => {
                    println!("  turn {iteration} interrupted (steered={steered}, follow_up={follow_up})");
                }
                _ => {}
            }
        };

        match agent.run(context.clone(), Some(&on_event)).await {
            Ok(response) => {
                println!("assistant> {}", response.text());
                context.push(Message::Assistant(response));
            }
            Err(err) => println!("error: {err}"),
        }
    }

    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
