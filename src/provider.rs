//! 4.C Provider contract: the seam between the agent loop and a concrete
//! LLM backend. Widens the teacher's `LLMProvider` trait (`src/llm/provider.rs`)
//! from a bespoke message/`StreamChunk` vocabulary to the shared `event`/
//! `message` types used everywhere else in this crate.

use crate::error::AgentError;
use crate::event::EventStream;
use crate::message::{AssistantMessage, Context, Cost, ModelDescriptor, ThinkingBudget, Usage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Per-call knobs layered on top of a provider's static `ModelDescriptor`.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning: Option<ThinkingBudget>,
    pub cache_retention: bool,
    pub headers: HashMap<String, String>,
    pub session_id: Option<String>,
}

/// A concrete LLM backend. One implementation per wire protocol (Anthropic
/// Messages API, OpenAI Chat Completions, ...), not one per model — the
/// model itself is carried in `model()`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn api_type(&self) -> &str;

    fn model(&self) -> &ModelDescriptor;

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        self.model().supported_inputs.contains(&crate::message::SupportedInput::Image)
    }

    fn supports_cache_retention(&self) -> bool {
        self.model().supports_cache_retention
    }

    fn supports_thinking_level(&self) -> bool {
        self.model().supports_reasoning
    }

    /// Open a streaming turn. Implementations translate `context` into the
    /// wire request, issue it, and yield `StreamEvent`s matching the §4.A
    /// grammar as the response arrives.
    async fn stream(
        &self,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<EventStream, AgentError>;

    /// Convenience non-streaming call: open a stream and collect it. Most
    /// providers never need to override this.
    async fn complete(
        &self,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<AssistantMessage, AgentError> {
        let stream = self.stream(context, options).await?;
        crate::event::collect(stream).await
    }

    /// Cost of one response, in the same currency units as the model's rate
    /// card. Default implementation multiplies `usage` by `model()`'s
    /// per-million rates; providers with non-linear pricing may override.
    fn calculate_cost(&self, usage: &Usage) -> Cost {
        let model = self.model();
        let rate = |tokens: u64, per_million: f64| (tokens as f64 / 1_000_000.0) * per_million;
        let input = rate(usage.input, model.cost_input_per_million);
        let output = rate(usage.output, model.cost_output_per_million);
        let cache_read = rate(usage.cache_read, model.cost_cache_read_per_million);
        let cache_write = rate(usage.cache_write, model.cost_cache_write_per_million);
        Cost { input, output, cache_read, cache_write, total: input + output + cache_read + cache_write }
    }
}

/// Provider-retry backoff policy (spec §4.C): `min(2^attempt + uniform(0,1), 60)`
/// seconds, capped at `max_retries` attempts (default 3). Textually distinct
/// from the tool-retry backoff in `loop_.rs`, which has no jitter or cap —
/// the two are similar-looking but not the same policy and must not be
/// unified into one helper.
pub async fn with_provider_retry<F, Fut, T>(max_retries: u32, mut f: F) -> Result<T, AgentError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && err.is_retryable() => {
                let delay = backoff_delay(attempt);
                log::warn!("provider call failed (attempt {attempt}), retrying in {delay:?}: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = 2f64.powi(attempt as i32);
    let jitter = jitter_unit();
    Duration::from_secs_f64((exp + jitter).min(60.0))
}

/// A pseudo-random value in `[0, 1)` derived from the clock, avoiding a
/// dedicated RNG dependency the teacher's stack does not otherwise need.
fn jitter_unit() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000_000) as f64 / 1_000_000_000.0
}
