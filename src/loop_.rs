//! §4.G Agent loop: the state machine driving one run from a `Context` to a
//! final `AssistantMessage`, grounded in `original_source/koda/agent/loop.py`'s
//! `AgentLoop` and the orchestration shape of the teacher's
//! `llm::helpers::chat_loop_with_tools`.
//!
//! Five places where this crate's behavior intentionally diverges from the
//! Python original in favor of spec.md's literal wording (the original is
//! authoritative only for resolving ambiguities, never for overriding
//! explicit spec text):
//!
//! 1. Steering is checked at the top of every iteration (step 3), not only
//!    between tool calls — the original only does the latter.
//! 2. A found follow-up message actually loops back to step 2; the original
//!    appends it to context but the caller's `run()` still returns.
//! 3. `Stop` and `Length` stop reasons both route through the same
//!    follow-up-check completion path (step 8) instead of special-casing
//!    `Length` as a hard stop.
//! 4. `run_continue` inspects the last message and branches three ways
//!    (assistant-with-tool-calls / tool-result / else-error) rather than
//!    ignoring the last message entirely.
//! 5. Tool-retry backoff (`retry_delay_base * 2^attempt`, no jitter or cap)
//!    stays a separate formula from the provider-retry backoff in
//!    `provider.rs` (jittered, capped at 60s) even though they look similar.
//!
//! A sixth, smaller correction not called out in spec.md: the follow-up
//! check in step 8 only consumes the queue when no steering message is
//! pending, rather than unconditionally calling `MessageQueue::get_next`
//! (which would silently discard a pending steering message whose `mode`
//! didn't match what step 8 was looking for).

use crate::config::AgentLoopConfig;
use crate::error::AgentError;
use crate::loop_detector::{LoopAction, LoopDetector, ToolCallSignature};
use crate::message::{AssistantMessage, Context, ContentPart, Message, ToolResultMessage};
use crate::parallel::{ParallelExecutor, Task, ToolCallRequest};
use crate::provider::{with_provider_retry, Provider, StreamOptions};
use crate::queue::{DeliveryMode, MessageQueue, QueuedMessage};
use crate::tools::{ToolContext, ToolRegistry};
use crate::transform::{adjust_for_anthropic, adjust_for_openai_compat, transform_context, TransformConfig, TransformStrategy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Thinking,
    ExecutingTool,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart { iteration: u32 },
    TurnEnd { iteration: u32, steered: bool, follow_up: bool },
    ToolResult { tool_call_id: String, tool_name: String, is_error: bool },
    AgentEnd { iterations: u32 },
}

pub type EventCallback = dyn Fn(AgentEvent) + Send + Sync;

fn emit(on_event: Option<&EventCallback>, event: AgentEvent) {
    if let Some(cb) = on_event {
        cb(event);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drives one conversation to completion against a `Provider` and a
/// `ToolRegistry`. Cheap to construct; expensive state (pending tool calls,
/// the message queue, the idle barrier) lives behind async-aware locks so
/// a run can be steered or inspected concurrently from other tasks.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: AgentLoopConfig,
    queue: Mutex<MessageQueue>,
    state: Mutex<AgentState>,
    is_idle: AtomicBool,
    idle_notify: Notify,
    pending_tool_calls: Mutex<HashMap<String, PendingToolCall>>,
    tool_calls_drained_notify: Notify,
    iteration_count: AtomicU32,
    cancelled: AtomicBool,
    loop_detector: Mutex<Option<LoopDetector>>,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: AgentLoopConfig) -> Arc<Self> {
        let loop_detector = config.enable_loop_detection.then(LoopDetector::new);
        let steering_mode = config.steering_mode;
        let follow_up_mode = config.follow_up_mode;
        Arc::new(Self {
            provider,
            tools,
            config,
            queue: Mutex::new(MessageQueue::new(steering_mode, follow_up_mode)),
            state: Mutex::new(AgentState::Idle),
            is_idle: AtomicBool::new(true),
            idle_notify: Notify::new(),
            pending_tool_calls: Mutex::new(HashMap::new()),
            tool_calls_drained_notify: Notify::new(),
            iteration_count: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            loop_detector: Mutex::new(loop_detector),
        })
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    pub async fn state(&self) -> AgentState {
        *self.state.lock().await
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn steer(&self, content: impl Into<String>) {
        self.queue.lock().await.queue_steering(content, now_ms());
    }

    pub async fn follow_up(&self, content: impl Into<String>) {
        self.queue.lock().await.queue_follow_up(content, now_ms());
    }

    pub async fn pending_tool_calls(&self) -> Vec<PendingToolCall> {
        self.pending_tool_calls.lock().await.values().cloned().collect()
    }

    pub async fn has_pending_tools(&self) -> bool {
        !self.pending_tool_calls.lock().await.is_empty()
    }

    /// Released only once `state` is `Idle` and no tool call is `Running`.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle.load(Ordering::SeqCst) && !self.has_pending_tools().await {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let _ = tokio::time::timeout(remaining, self.idle_notify.notified()).await;
        }
    }

    /// Manually apply the same compaction the loop would apply automatically
    /// in step 4, useful for a caller that wants to shrink a context before
    /// handing it elsewhere (spec §6's `compact` operation).
    pub fn compact(&self, context: &Context) -> Context {
        self.prepare_context(context)
    }

    async fn set_state(&self, state: AgentState) {
        *self.state.lock().await = state;
        let idle = state == AgentState::Idle || state == AgentState::Error || state == AgentState::Cancelled;
        self.is_idle.store(idle, Ordering::SeqCst);
        if idle {
            self.idle_notify.notify_waiters();
        }
    }

    fn prepare_context(&self, context: &Context) -> Context {
        let mut prepared = context.clone();
        if prepared.tools.is_none() {
            let descriptors = self.tools.descriptors();
            if !descriptors.is_empty() {
                prepared.tools = Some(descriptors);
            }
        }

        let tokens = crate::message::estimate_context_tokens(&prepared);
        if tokens > self.config.compaction_trigger_tokens() {
            let transform_config = TransformConfig {
                strategy: TransformStrategy::Smart,
                max_tokens: self.config.max_context_tokens,
                target_utilization: self.config.target_utilization,
                preserve_recent: self.config.preserve_recent,
                min_messages: self.config.min_messages,
            };
            prepared = transform_context(&prepared, &transform_config).context;
            prepared = match self.provider.provider_id() {
                "anthropic" => adjust_for_anthropic(&prepared),
                id @ ("openai" | "mistral" | "groq") => adjust_for_openai_compat(&prepared, id),
                _ => prepared,
            };
        }

        prepared
    }

    async fn take_steering(&self) -> Option<QueuedMessage> {
        let mut queue = self.queue.lock().await;
        if queue.pending_steering_count() == 0 {
            return None;
        }
        queue.get_next(now_ms()).filter(|m| m.mode == DeliveryMode::Steering)
    }

    async fn take_follow_up(&self) -> Option<QueuedMessage> {
        let mut queue = self.queue.lock().await;
        if queue.pending_steering_count() > 0 {
            // Leave it for the next iteration's step-3 check rather than
            // losing it the way an unconditional `get_next()` would.
            return None;
        }
        queue.get_next(now_ms())
    }

    async fn track_start(&self, call: &ToolCallRequest) {
        let mut pending = self.pending_tool_calls.lock().await;
        pending.insert(
            call.id.clone(),
            PendingToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                status: ToolCallStatus::Running,
                created_at: now_ms(),
                started_at: Some(now_ms()),
                completed_at: None,
                retry_count: 0,
            },
        );
    }

    async fn track_retry(&self, id: &str) {
        if let Some(p) = self.pending_tool_calls.lock().await.get_mut(id) {
            p.retry_count += 1;
        }
    }

    async fn track_complete(&self, id: &str, failed: bool) {
        let mut pending = self.pending_tool_calls.lock().await;
        if let Some(mut p) = pending.remove(id) {
            p.completed_at = Some(now_ms());
            p.status = if failed { ToolCallStatus::Failed } else { ToolCallStatus::Completed };
        }
        if pending.is_empty() {
            self.tool_calls_drained_notify.notify_waiters();
        }
    }

    async fn check_loop(&self, call: &ToolCallRequest) -> Option<crate::loop_detector::LoopDetection> {
        let mut guard = self.loop_detector.lock().await;
        let detector = guard.as_mut()?;
        detector.check(&ToolCallSignature { id: call.id.clone(), name: call.name.clone(), arguments: call.arguments.clone() })
    }

    /// §4.G step 7, third bullet: retry with `retryDelayBase * 2^attempt`
    /// backoff (no jitter, no cap — unlike the provider-retry policy).
    async fn execute_tool_with_retry(&self, call: &ToolCallRequest) -> ToolResultMessage {
        self.track_start(call).await;

        if let Some(detection) = self.check_loop(call).await {
            if detection.action == LoopAction::Terminate {
                self.track_complete(&call.id, true).await;
                return error_result(call, "repeated tool call pattern detected");
            }
            if let Some(warning) = &detection.warning_message {
                log::warn!("{warning}");
            }
        }

        if !self.tools.contains(&call.name) {
            self.track_complete(&call.id, true).await;
            return error_result(call, &format!("tool '{}' not found", call.name));
        }

        let ctx = ToolContext { tool_call_id: call.id.clone(), session_id: None, working_dir: None };

        for attempt in 0..self.config.retry_attempts {
            if self.is_cancelled() {
                self.track_complete(&call.id, true).await;
                return error_result(call, "operation aborted");
            }

            let attempted = tokio::time::timeout(self.config.tool_timeout, self.tools.dispatch(&call.name, call.arguments.clone(), &ctx)).await;

            let failure = match attempted {
                Ok(Ok(outcome)) => {
                    self.track_complete(&call.id, false).await;
                    return ToolResultMessage {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content: vec![ContentPart::text(outcome.into_text())],
                        is_error: false,
                        timestamp: now_ms(),
                    };
                }
                Ok(Err(message)) => message,
                Err(_) => format!("tool execution timed out after {:?}", self.config.tool_timeout),
            };

            if attempt + 1 < self.config.retry_attempts {
                self.track_retry(&call.id).await;
                tokio::time::sleep(self.config.retry_delay_base * 2u32.pow(attempt)).await;
                continue;
            }

            self.track_complete(&call.id, true).await;
            return error_result(call, &failure);
        }

        self.track_complete(&call.id, true).await;
        error_result(call, "max retries exceeded")
    }

    /// Sequential execution without a mid-turn steering consult — used by
    /// `run_continue`'s pre-execution of pending tool calls.
    async fn execute_calls(self: &Arc<Self>, calls: &[ToolCallRequest]) -> Vec<ToolResultMessage> {
        if calls.len() == 1 || !self.config.enable_parallel_tools {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute_tool_with_retry(call).await);
            }
            results
        } else {
            self.execute_parallel(calls).await
        }
    }

    /// §4.G step 7: sequential execution with a steering consult after each
    /// tool call. Returns the results so far plus a steering message if one
    /// interrupted the turn.
    async fn execute_sequential(self: &Arc<Self>, calls: &[ToolCallRequest]) -> (Vec<ToolResultMessage>, Option<QueuedMessage>) {
        let mut results = Vec::with_capacity(calls.len());
        let mut steered = None;

        for call in calls {
            let result = self.execute_tool_with_retry(call).await;
            results.push(result);

            if self.config.enable_steering {
                if let Some(msg) = self.take_steering().await {
                    steered = Some(msg);
                    break;
                }
            }
        }

        (results, steered)
    }

    async fn execute_parallel(self: &Arc<Self>, calls: &[ToolCallRequest]) -> Vec<ToolResultMessage> {
        let executor = ParallelExecutor::new(self.config.max_parallel_tools);
        let tasks = calls
            .iter()
            .map(|call| {
                let agent = self.clone();
                let call = ToolCallRequest { id: call.id.clone(), name: call.name.clone(), arguments: call.arguments.clone() };
                Task::new(call.id.clone(), async move { Ok::<_, String>(agent.execute_tool_with_retry(&call).await) })
            })
            .collect();

        let results = executor.execute(tasks).await.expect("tool-call tasks declare no dependencies, so grouping cannot fail");
        calls
            .iter()
            .map(|call| results.get(call.id.as_str()).and_then(|r| r.output.clone()).unwrap_or_else(|| error_result(call, "task result missing")))
            .collect()
    }

    async fn handle_completion(&self, context: &mut Context, response: &AssistantMessage, on_event: Option<&EventCallback>, iteration: u32) -> Option<Result<AssistantMessage, AgentError>> {
        if self.config.enable_follow_up {
            if let Some(follow_up) = self.take_follow_up().await {
                context.push(Message::user(follow_up.content, now_ms()));
                emit(on_event, AgentEvent::TurnEnd { iteration, steered: false, follow_up: true });
                return None;
            }
        }

        self.set_state(AgentState::Idle).await;
        emit(on_event, AgentEvent::AgentEnd { iterations: iteration });
        Some(Ok(response.clone()))
    }

    /// The §4.G main cycle. `resume_at_step5` is set only by `run_continue`
    /// for its very first pass through the loop, skipping the cancellation
    /// check, `turnStart` emission, and steering consult that would
    /// otherwise happen at the top of an iteration (spec's "resume at
    /// step 5").
    async fn main_cycle(self: &Arc<Self>, mut context: Context, on_event: Option<&EventCallback>, mut resume_at_step5: bool) -> Result<AssistantMessage, AgentError> {
        loop {
            if !resume_at_step5 && self.is_cancelled() {
                self.set_state(AgentState::Cancelled).await;
                return Err(AgentError::Aborted);
            }

            let iteration = self.iteration_count.fetch_add(1, Ordering::SeqCst) + 1;
            if iteration > self.config.max_iterations {
                self.set_state(AgentState::Error).await;
                return Err(AgentError::IterationOverflow);
            }

            if !resume_at_step5 {
                emit(on_event, AgentEvent::TurnStart { iteration });

                if self.config.enable_steering {
                    if let Some(steering) = self.take_steering().await {
                        context.push(Message::user(steering.content, now_ms()));
                        emit(on_event, AgentEvent::TurnEnd { iteration, steered: true, follow_up: false });
                        continue;
                    }
                }
            }
            resume_at_step5 = false;

            let prepared = self.prepare_context(&context);

            self.set_state(AgentState::Thinking).await;
            let options = StreamOptions::default();
            let provider = self.provider.clone();
            let response = match with_provider_retry(self.config.retry_attempts, |_attempt| provider.complete(&prepared, &options)).await {
                Ok(response) => response,
                Err(err) => {
                    self.set_state(AgentState::Error).await;
                    return Err(err);
                }
            };

            if self.is_cancelled() {
                self.set_state(AgentState::Cancelled).await;
                return Err(AgentError::Aborted);
            }

            if !response.has_tool_calls() {
                context.push(Message::Assistant(response.clone()));
                if let Some(outcome) = self.handle_completion(&mut context, &response, on_event, iteration).await {
                    return outcome;
                }
                continue;
            }

            self.set_state(AgentState::ExecutingTool).await;

            let calls: Vec<ToolCallRequest> = response
                .tool_calls()
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall { id, name, arguments, .. } => Some(ToolCallRequest { id: id.clone(), name: name.clone(), arguments: arguments.clone() }),
                    _ => None,
                })
                .collect();

            // §6's ceiling on tool calls per turn: anything past it is
            // rejected outright rather than dispatched, so a single
            // over-eager response can't fan out unboundedly.
            let ceiling = self.config.max_tool_calls_per_turn;
            let (executable, rejected): (&[ToolCallRequest], &[ToolCallRequest]) =
                if calls.len() > ceiling { calls.split_at(ceiling) } else { (&calls[..], &[]) };

            let (mut results, steered) = if executable.len() == 1 || !self.config.enable_parallel_tools {
                self.execute_sequential(executable).await
            } else {
                (self.execute_parallel(executable).await, None)
            };

            for call in rejected {
                results.push(error_result(
                    call,
                    &format!("tool-call ceiling exceeded: turn requested {} calls, max_tool_calls_per_turn is {ceiling}", calls.len()),
                ));
            }

            for result in &results {
                emit(on_event, AgentEvent::ToolResult { tool_call_id: result.tool_call_id.clone(), tool_name: result.tool_name.clone(), is_error: result.is_error });
            }

            context.push(Message::Assistant(response));
            for result in results {
                context.push(Message::ToolResult(result));
            }

            if let Some(steering) = steered {
                context.push(Message::user(steering.content, now_ms()));
                emit(on_event, AgentEvent::TurnEnd { iteration, steered: true, follow_up: false });
                continue;
            }

            emit(on_event, AgentEvent::TurnEnd { iteration, steered: false, follow_up: false });
        }
    }

    /// §6 `run`: start a fresh turn from `context`.
    pub async fn run(self: &Arc<Self>, context: Context, on_event: Option<&EventCallback>) -> Result<AssistantMessage, AgentError> {
        self.iteration_count.store(0, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.set_state(AgentState::Running).await;
        self.main_cycle(context, on_event, false).await
    }

    /// §6 `runContinue` / §4.G `continue`: resume from `context` without
    /// appending a new user message, branching on the last message's shape.
    pub async fn run_continue(self: &Arc<Self>, context: Context, on_event: Option<&EventCallback>) -> Result<AssistantMessage, AgentError> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.set_state(AgentState::Running).await;

        match context.messages.last() {
            Some(Message::Assistant(assistant)) if assistant.has_tool_calls() => {
                let calls: Vec<ToolCallRequest> = assistant
                    .tool_calls()
                    .into_iter()
                    .filter_map(|part| match part {
                        ContentPart::ToolCall { id, name, arguments, .. } => Some(ToolCallRequest { id: id.clone(), name: name.clone(), arguments: arguments.clone() }),
                        _ => None,
                    })
                    .collect();

                self.set_state(AgentState::ExecutingTool).await;
                let results = self.execute_calls(&calls).await;

                let mut resumed = context;
                for result in results {
                    resumed.push(Message::ToolResult(result));
                }
                self.main_cycle(resumed, on_event, true).await
            }
            Some(Message::ToolResult(_)) => self.main_cycle(context, on_event, true).await,
            _ => Err(AgentError::InvalidContinuation("last message must be an assistant message with unexecuted tool calls, or a tool result".into())),
        }
    }
}

fn error_result(call: &ToolCallRequest, message: &str) -> ToolResultMessage {
    ToolResultMessage { tool_call_id: call.id.clone(), tool_name: call.name.clone(), content: vec![ContentPart::text(format!("Error: {message}"))], is_error: true, timestamp: now_ms() }
}
