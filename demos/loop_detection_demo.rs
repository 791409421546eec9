// Example: loop detection guarding the agent loop
//
// This demonstrates:
// - Enabling the opt-in loop detector on `AgentLoopConfig`
// - How a detected loop surfaces: a `log::warn!` on the first two
//   detections, then an error tool result instead of a further dispatch
//   once the detector escalates to `Terminate`
//
// Run with: cargo run --example loop_detection_demo --features openai

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
    agent_kernel::logger::init_structured_logging(log::LevelFilter::Warn, None)?;

    let api_key =
        std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY environment variable not set");
    let provider = Arc::new(OpenAIProvider::new(api_key, model()));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(BashTool::new().with_timeout(10)));

    let config = AgentLoopConfig::default().with_loop_detection(true).with_max_iterations(20);
    let agent = Agent::new(provider, Arc::new(tools), config);

    let task = "Please check the current directory repeatedly. \
                Keep checking it even if you already know what's there.";
    println!("Task:\n{task}\n");

    let mut context = Context::new(None);
    context.push(Message::user(task, 0));

    let on_event = |event: agent_kernel::loop_::AgentEvent| {
        if let agent_kernel::loop_::AgentEvent::ToolResult { is_error: true, tool_name, .. } = event {
            println!("  [{tool_name}] tool result was an error (may be the loop detector's Terminate path)");
        }
    };

    match agent.run(context, Some(&on_event)).await {
        Ok(response) => {
            println!("\ncompleted normally");
            println!("{}", response.text());
        }
        Err(err) => {
            println!("\nrun ended with an error: {err}");
        }
    }

    Ok(())
}
