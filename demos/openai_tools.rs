// Example: manual tool-call handling below the `Agent` loop
//
// NOTE: this bypasses `Agent`'s retry/steering/loop-detection machinery for
// educational purposes. For real usage, prefer `simple_agent.rs`'s `Agent`
// API.
//
// This demonstrates:
// - Collecting a stream into an `AssistantMessage` with `event::collect`
// - Answering requested tool calls by hand and feeding results back in
// - Re-streaming until the model stops requesting tools
//
// Run with: cargo run --example openai_tools --features openai

use agent_kernel::event::collect;
use agent_kernel::message::{ContentPart, ModelDescriptor, SupportedInput, ToolDescriptor, ToolResultMessage};
use agent_kernel::provider::{Provider, StreamOptions};
use agent_kernel::providers::OpenAIProvider;
use agent_kernel::{Context, Message};
use serde_json::json;

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

fn get_weather_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "get_weather".into(),
        description: "Get the current weather for a location".into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "The city and country, e.g. San Francisco, CA"},
                "unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}
            },
            "required": ["location"]
        }),
    }
}

/// Fake tool execution: the answer is fixed, since this example is about the
/// manual stream/context plumbing, not a real weather API.
fn answer_weather_call(arguments: &serde_json::Value) -> String {
    let location = arguments.get("location").and_then(|v| v.as_str()).unwrap_or("your location");
    format!("The weather in {location} is sunny, 72°F (22°C)")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY environment variable not set");
    let provider = OpenAIProvider::new(api_key, model());

    println!("User: What's the weather like in San Francisco?\n");

    let mut context = Context::new(None);
    context.push(Message::user("What's the weather like in San Francisco?", 0));
    context.tools = Some(vec![get_weather_tool()]);

    loop {
        let stream = provider.stream(&context, &StreamOptions::default()).await?;
        let response = collect(stream).await?;

        if !response.text().is_empty() {
            println!("assistant: {}", response.text());
        }

        let calls: Vec<_> = response
            .tool_calls()
            .into_iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, name, arguments, .. } => Some((id.clone(), name.clone(), arguments.clone())),
                _ => None,
            })
            .collect();

        let has_tool_calls = !calls.is_empty();
        context.push(Message::Assistant(response));

        if !has_tool_calls {
            break;
        }

        for (id, name, arguments) in calls {
            println!("  tool call: {name}({arguments})");
            context.push(Message::ToolResult(ToolResultMessage {
                tool_call_id: id,
                tool_name: name,
                content: vec![ContentPart::text(answer_weather_call(&arguments))],
                is_error: false,
                timestamp: 0,
            }));
        }
    }

    Ok(())
}
