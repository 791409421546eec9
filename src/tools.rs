//! 4.D Tool registry & dispatch.
//!
//! The teacher's `tools/registry.rs` references a `ToolProvider` trait that
//! is never defined anywhere in the teacher — this module supplies the
//! missing trait from scratch, shaped the way the teacher's own
//! `LLMProvider` trait is shaped (one trait, one registry, a thin
//! value-level result type handed back to the caller).

use crate::message::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub mod bash;

pub use bash::BashTool;

/// Per-call context a handler may need but that isn't part of its JSON
/// arguments: which call this is, which session it belongs to, where to run.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub tool_call_id: String,
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,
}

/// What a handler hands back. Spec §4.D's result-normalization rule applies
/// on `into_text()`: prefer `output`, then `content`, then stringify.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    pub output: Option<Value>,
    pub content: Option<String>,
}

impl ToolOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self { output: None, content: Some(content.into()) }
    }

    pub fn json(output: Value) -> Self {
        Self { output: Some(output), content: None }
    }

    pub fn into_text(self) -> String {
        if let Some(output) = self.output {
            return match output {
                Value::String(s) => s,
                other => other.to_string(),
            };
        }
        self.content.unwrap_or_default()
    }
}

/// One tool a model can call. Implementations own their own argument
/// validation; the registry only routes by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, String>;

    /// Whether the agent loop should pause for caller confirmation before
    /// dispatching this tool. Defaults to false; destructive tools override.
    fn requires_confirmation(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// What the model sees: name/description/JSON-Schema, nothing else.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.handlers
            .values()
            .map(|h| ToolDescriptor { name: h.name().to_string(), description: h.description().to_string(), parameters: h.parameters() })
            .collect()
    }

    pub async fn dispatch(&self, name: &str, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, String> {
        match self.get(name) {
            Some(handler) => handler.execute(arguments, ctx).await,
            None => Err(format!("no tool registered with name '{name}'")),
        }
    }
}
