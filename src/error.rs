//! Crate-wide error type.
//!
//! Every fallible operation in the kernel (provider transport, tool
//! dispatch, context transformation, the agent loop itself) reports through
//! this single enum rather than each module inventing its own, so a caller
//! can match on one error vocabulary end to end.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("provider transport error: {0}")]
    ProviderTransport(String),

    #[error("provider protocol error: {0}")]
    ProviderProtocol(String),

    #[error("tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    #[error("tool '{name}' timed out after {timeout:?}")]
    ToolTimeout { name: String, timeout: Duration },

    #[error("dependency '{0}' failed")]
    DependencyFailed(String),

    #[error("run aborted")]
    Aborted,

    #[error("max iterations reached")]
    IterationOverflow,

    #[error("context overflow after compaction: {0} tokens over budget")]
    ContextOverflow(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid continuation: {0}")]
    InvalidContinuation(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

impl AgentError {
    /// Whether the core should retry a provider call that failed this way.
    /// Retryable conditions per the provider retry policy: timeouts,
    /// connection errors, HTTP 429/500/503, vendor rate-limit messages.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::RateLimitExceeded => true,
            AgentError::ProviderTransport(_) => true,
            AgentError::Network(e) => e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| {
                s.as_u16() == 429 || s.as_u16() == 500 || s.as_u16() == 503
            }),
            _ => false,
        }
    }
}
