// Example: driving a `Provider` directly, below the `Agent` loop
//
// This demonstrates:
// - Opening a stream with `Provider::stream` and consuming raw `StreamEvent`s
// - `event::text_chunks` as a convenience over manually matching `TextDelta`
// - Reading `Usage` off the terminal `Done` event
//
// Run with: cargo run --example openai_basic --features openai

use agent_kernel::event::text_chunks;
use agent_kernel::message::{ModelDescriptor, SupportedInput};
use agent_kernel::provider::{Provider, StreamOptions};
use agent_kernel::providers::OpenAIProvider;
use agent_kernel::{Context, Message};
use futures::StreamExt;

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
    let provider = OpenAIProvider::new(api_key, model());

    println!("Question: Explain what Rust is and why it's popular in 2-3 sentences.\n");

    let mut context = Context::new(Some("You are a helpful assistant.".into()));
    context.push(Message::user(
        "Explain what Rust is and why it's popular in 2-3 sentences.",
        chrono::Utc::now().timestamp_millis(),
    ));

    let stream = provider.stream(&context, &StreamOptions::default()).await?;
    let mut chunks = text_chunks(stream);
    while let Some(chunk) = chunks.next().await {
        print!("{}", chunk?);
        std::io::Write::flush(&mut std::io::stdout())?;
    }
    println!();

    // `text_chunks` discards everything but text deltas; redo the call to
    // also see the terminal usage, the way a caller who needs both would.
    let stream = provider.stream(&context, &StreamOptions::default()).await?;
    let message = agent_kernel::event::collect(stream).await?;
    println!(
        "\nUsage: {} input, {} output tokens",
        message.usage.input, message.usage.output
    );

    Ok(())
}
