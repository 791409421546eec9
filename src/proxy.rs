//! §4.I streaming proxy reconstructor: consumes a bandwidth-optimized wire
//! format from an intermediary HTTP server (the server strips the
//! cumulative `partial` snapshot from every delta event to save bandwidth)
//! and re-emits the crate's own `StreamEvent` grammar.
//!
//! Grounded in `original_source/koda/agent/stream_proxy.py`'s
//! `_process_proxy_event`, adapted two ways:
//!
//! - The Python client maintains one ever-growing `partial: AssistantMessage`
//!   and re-attaches it to *every* reconstructed event, because its
//!   `AssistantMessageEvent` protocol carries `partial` on every variant.
//!   This crate's own `StreamEvent` (see `event.rs`) only carries a
//!   snapshot on `Start`; every other variant is already a pure delta. So
//!   this module only synthesizes the zeroed shell message once, for
//!   `Start`, and otherwise maps each wire event onto the matching
//!   `StreamEvent` delta variant directly — `event::collect()` already
//!   does the snapshot accumulation generically for any `EventStream`,
//!   proxy-sourced or not, so duplicating it here would be redundant.
//! - Python opens the connection eagerly and pushes into a queue from a
//!   background task, decoupling the HTTP request from stream consumption.
//!   Rust's `Stream` is pull-based, so the request is issued lazily, the
//!   first time the returned stream is polled, via `async_stream::stream!`
//!   — the teacher's providers (`providers/anthropic.rs`) use the same
//!   shape for their own SSE consumption.
//! - A wire-level transport failure (the underlying SSE connection drops or
//!   errors mid-stream) never surfaces as a raw `Err` item on the returned
//!   stream: it's mapped to a terminal `StreamEvent::Error`, matching
//!   `_process_proxy_event`'s behavior of routing a caught exception through
//!   its own error event rather than letting it propagate raw. A bare `Err`
//!   would make `event::collect`'s `?` abort before reaching its `message`
//!   accumulator, discarding every delta already applied instead of
//!   returning the partial message with `stop_reason: Error` the way
//!   `collect` already handles any other `StreamEvent::Error`.

use crate::error::AgentError;
use crate::event::{EventStream, StreamEvent};
use crate::message::{AssistantMessage, Context, StopReason, Usage};
use crate::provider::StreamOptions;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// Per-call options for a proxied stream, grounded in
/// `stream_proxy.py`'s `ProxyStreamOptions`.
#[derive(Debug, Clone, Default)]
pub struct ProxyStreamOptions {
    pub auth_token: String,
    pub proxy_url: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ProxyStreamOptions {
    pub fn new(auth_token: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        Self { auth_token: auth_token.into(), proxy_url: proxy_url.into(), temperature: None, max_tokens: None }
    }

    fn from_stream_options(auth_token: impl Into<String>, proxy_url: impl Into<String>, options: &StreamOptions) -> Self {
        Self {
            auth_token: auth_token.into(),
            proxy_url: proxy_url.into(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        }
    }
}

/// The proxy server's minimal wire shape: §4.A events with delta-only
/// payloads, no `partial`. Field casing mirrors `contentIndex` /
/// `toolName` / `contentSignature` / `errorMessage` as sent over the wire.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProxyEvent {
    Start,
    TextStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
    },
    TextDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    TextEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(default, rename = "contentSignature")]
        content_signature: Option<String>,
    },
    ThinkingStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
    },
    ThinkingDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    ThinkingEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(default, rename = "contentSignature")]
        content_signature: Option<String>,
    },
    ToolcallStart {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolcallDelta {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        delta: String,
    },
    ToolcallEnd {
        #[serde(rename = "contentIndex")]
        content_index: usize,
        #[serde(default)]
        arguments: Option<serde_json::Value>,
    },
    Done {
        reason: StopReason,
        usage: Usage,
    },
    Error {
        reason: StopReason,
        #[serde(default, rename = "errorMessage")]
        error_message: String,
    },
}

/// Builds the zeroed shell `AssistantMessage` a wire `start` event expands
/// into locally (`stream_proxy.py`'s `partial` before the first delta).
fn shell_message(api: &str, provider: &str, model: &str) -> AssistantMessage {
    AssistantMessage {
        content: Vec::new(),
        api: api.to_string(),
        provider: provider.to_string(),
        model: model.to_string(),
        usage: Usage::default(),
        stop_reason: StopReason::Stop,
        error_message: None,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

fn map_event(event: ProxyEvent, api: &str, provider: &str, model: &str) -> StreamEvent {
    match event {
        ProxyEvent::Start => StreamEvent::Start { partial: shell_message(api, provider, model) },
        ProxyEvent::TextStart { content_index } => StreamEvent::TextStart { content_index },
        ProxyEvent::TextDelta { content_index, delta } => StreamEvent::TextDelta { content_index, delta },
        ProxyEvent::TextEnd { content_index, content_signature } => {
            StreamEvent::TextEnd { content_index, signature: content_signature }
        }
        ProxyEvent::ThinkingStart { content_index } => StreamEvent::ThinkingStart { content_index },
        ProxyEvent::ThinkingDelta { content_index, delta } => StreamEvent::ThinkingDelta { content_index, delta },
        ProxyEvent::ThinkingEnd { content_index, content_signature } => {
            StreamEvent::ThinkingEnd { content_index, signature: content_signature }
        }
        ProxyEvent::ToolcallStart { content_index, id, tool_name } => {
            StreamEvent::ToolcallStart { content_index, id, name: tool_name }
        }
        ProxyEvent::ToolcallDelta { content_index, delta } => StreamEvent::ToolcallDelta { content_index, delta },
        ProxyEvent::ToolcallEnd { content_index, arguments } => {
            StreamEvent::ToolcallEnd { content_index, arguments: arguments.unwrap_or(serde_json::json!({})) }
        }
        ProxyEvent::Done { reason, usage } => StreamEvent::Done { reason, usage },
        ProxyEvent::Error { reason, error_message } => StreamEvent::Error { reason, error_message },
    }
}

fn map_http_error(status: reqwest::StatusCode, body: String) -> AgentError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    let message = serde_json::from_str::<ErrorBody>(&body).map(|b| b.error).unwrap_or(body);
    match status.as_u16() {
        401 | 403 => AgentError::AuthenticationFailed,
        429 => AgentError::RateLimitExceeded,
        _ => AgentError::ProviderTransport(format!("proxy HTTP {status}: {message}")),
    }
}

#[derive(Serialize)]
struct ProxyRequestBody<'a> {
    model: ProxyModelRef<'a>,
    context: &'a Context,
    options: ProxyOptionsRef,
}

#[derive(Serialize)]
struct ProxyModelRef<'a> {
    api: &'a str,
    provider: &'a str,
    id: &'a str,
}

#[derive(Serialize)]
struct ProxyOptionsRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Opens the proxy connection and returns a stream of reconstructed
/// `StreamEvent`s. `api`/`provider`/`model` populate the synthesized shell
/// message the `start` event expands into, mirroring what a local provider
/// would otherwise report about itself.
pub async fn stream_proxy(
    client: &reqwest::Client,
    api: &str,
    provider: &str,
    model: &str,
    context: &Context,
    options: &ProxyStreamOptions,
) -> Result<EventStream, AgentError> {
    let body = ProxyRequestBody {
        model: ProxyModelRef { api, provider, id: model },
        context,
        options: ProxyOptionsRef { temperature: options.temperature, max_tokens: options.max_tokens },
    };

    let response = client
        .post(format!("{}/api/stream", options.proxy_url))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", options.auth_token))
        .json(&body)
        .send()
        .await
        .map_err(AgentError::Network)?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(map_http_error(status, text));
    }

    let api = api.to_string();
    let provider = provider.to_string();
    let model = model.to_string();
    let mut event_stream = response.bytes_stream().eventsource();

    let output = async_stream::stream! {
        loop {
            let next = event_stream.next().await;
            let raw = match next {
                None => break,
                Some(Ok(e)) => e,
                Some(Err(err)) => {
                    // A raw `Err` here would short-circuit `event::collect`'s
                    // `?` before it ever reaches the match on `StreamEvent`,
                    // discarding every delta already applied to its `message`
                    // accumulator. A terminal `StreamEvent::Error` instead
                    // lets `collect` stamp the in-flight message with the
                    // failure and return it, per §4.I.
                    yield Ok(StreamEvent::Error { reason: StopReason::Error, error_message: err.to_string() });
                    return;
                }
            };

            if raw.data.trim().is_empty() {
                continue;
            }

            let proxy_event: ProxyEvent = match serde_json::from_str(&raw.data) {
                Ok(e) => e,
                // Mirrors `_process_proxy_event`'s tolerance of an
                // unrecognized wire event type: skip it rather than
                // failing the whole stream.
                Err(_) => continue,
            };

            let is_terminal = matches!(proxy_event, ProxyEvent::Done { .. } | ProxyEvent::Error { .. });
            yield Ok(map_event(proxy_event, &api, &provider, &model));
            if is_terminal {
                return;
            }
        }
    };

    Ok(Box::pin(output))
}

/// Convenience entry point building `ProxyStreamOptions` from the crate's
/// own `StreamOptions`, for callers wiring a proxy into the same call
/// sites a direct `Provider::stream` call would use.
pub async fn stream_via_proxy(
    client: &reqwest::Client,
    api: &str,
    provider: &str,
    model: &str,
    context: &Context,
    auth_token: impl Into<String>,
    proxy_url: impl Into<String>,
    options: &StreamOptions,
) -> Result<EventStream, AgentError> {
    let proxy_options = ProxyStreamOptions::from_stream_options(auth_token, proxy_url, options);
    stream_proxy(client, api, provider, model, context, &proxy_options).await
}
