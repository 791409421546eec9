//! Configuration knobs table (spec §6), as a builder-style config struct
//! following the teacher's `ProviderConfig`/`ChatLoopConfig` idiom.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    OneAtATime,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLoopConfig {
    pub max_iterations: u32,
    pub max_tool_calls_per_turn: usize,
    pub retry_attempts: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay_base: Duration,
    #[serde(with = "duration_secs")]
    pub tool_timeout: Duration,
    pub enable_parallel_tools: bool,
    pub max_parallel_tools: usize,
    pub enable_steering: bool,
    pub enable_follow_up: bool,
    pub steering_mode: QueueMode,
    pub follow_up_mode: QueueMode,
    pub max_context_tokens: u64,
    pub compaction_threshold: f64,
    pub target_utilization: f64,
    pub preserve_recent: usize,
    pub min_messages: usize,
    /// `[AMBIENT]` enables the opt-in loop-detector safety net (§4.G).
    pub enable_loop_detection: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_tool_calls_per_turn: 32,
            retry_attempts: 3,
            retry_delay_base: Duration::from_secs(1),
            tool_timeout: Duration::from_secs(600),
            enable_parallel_tools: true,
            max_parallel_tools: 8,
            enable_steering: true,
            enable_follow_up: true,
            steering_mode: QueueMode::OneAtATime,
            follow_up_mode: QueueMode::OneAtATime,
            max_context_tokens: 128_000,
            compaction_threshold: 0.85,
            target_utilization: 0.75,
            preserve_recent: 4,
            min_messages: 2,
            enable_loop_detection: false,
        }
    }
}

impl AgentLoopConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_tool_calls_per_turn(mut self, n: usize) -> Self {
        self.max_tool_calls_per_turn = n;
        self
    }

    pub fn with_retry_attempts(mut self, n: u32) -> Self {
        self.retry_attempts = n;
        self
    }

    pub fn with_retry_delay_base(mut self, d: Duration) -> Self {
        self.retry_delay_base = d;
        self
    }

    pub fn with_tool_timeout(mut self, d: Duration) -> Self {
        self.tool_timeout = d;
        self
    }

    pub fn with_parallel_tools(mut self, enabled: bool, max_concurrency: usize) -> Self {
        self.enable_parallel_tools = enabled;
        self.max_parallel_tools = max_concurrency;
        self
    }

    pub fn with_steering(mut self, enabled: bool, mode: QueueMode) -> Self {
        self.enable_steering = enabled;
        self.steering_mode = mode;
        self
    }

    pub fn with_follow_up(mut self, enabled: bool, mode: QueueMode) -> Self {
        self.enable_follow_up = enabled;
        self.follow_up_mode = mode;
        self
    }

    pub fn with_max_context_tokens(mut self, n: u64) -> Self {
        self.max_context_tokens = n;
        self
    }

    pub fn with_compaction_threshold(mut self, t: f64) -> Self {
        self.compaction_threshold = t;
        self
    }

    pub fn with_preserve_recent(mut self, n: usize) -> Self {
        self.preserve_recent = n;
        self
    }

    pub fn with_min_messages(mut self, n: usize) -> Self {
        self.min_messages = n;
        self
    }

    pub fn with_loop_detection(mut self, enabled: bool) -> Self {
        self.enable_loop_detection = enabled;
        self
    }

    /// `[AMBIENT]` load from a YAML file, following the teacher's existing
    /// `serde_yaml` dependency (used elsewhere in the teacher for its own
    /// map-file format) — spec.md is silent on config-file format, so this
    /// supplements rather than contradicts it.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::AgentError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        serde_yaml::from_str(&text).map_err(|e| crate::error::AgentError::Config(e.to_string()))
    }

    /// The effective token budget at which auto-compaction triggers.
    pub fn compaction_trigger_tokens(&self) -> u64 {
        (self.max_context_tokens as f64 * self.compaction_threshold) as u64
    }

    /// The target token budget compaction should prune down to.
    pub fn compaction_target_tokens(&self) -> u64 {
        (self.max_context_tokens as f64 * self.target_utilization) as u64
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
