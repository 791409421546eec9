// Example: simple agent loop with the bash tool
//
// This demonstrates:
// - Driving an `Agent` through `run()` to completion
// - Registering the bash tool so the model can call it
// - Reading the final `AssistantMessage` and its usage
//
// Run with: cargo run --example simple_agent --features openai

use agent_kernel::message::{ModelDescriptor, SupportedInput};
use agent_kernel::providers::OpenAIProvider;
use agent_kernel::tools::{BashTool, ToolRegistry};
use agent_kernel::{Agent, AgentLoopConfig, Context, Message};
use std::sync::Arc;

fn model() -> ModelDescriptor {
    ModelDescriptor {
        id: "gpt-5-nano".into(),
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

    println!("Simple agent: multi-turn tool calling\n");

    let task = "Please help me with the following tasks:\n\
                1. List all children folders in the current directory\n\
                2. Check files in the current folder and give me a summary";
    println!("Task:\n{task}\n");

    let mut context = Context::new(None);
    context.push(Message::user(task, now_ms()));

    let result = agent.run(context, None).await?;

    println!("\nAssistant:\n{}", result.text());
    println!("\nUsage: {} in, {} out (total {})", result.usage.input, result.usage.output, result.usage.total_tokens);

    Ok(())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
