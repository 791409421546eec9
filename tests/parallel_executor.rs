//! Integration coverage of §4.H's `ParallelExecutor`/`execute_tool_calls`
//! against a real `ToolRegistry` (including the bundled `BashTool`), beyond
//! what `parallel.rs`'s own inline unit tests exercise in isolation.

use agent_kernel::parallel::{execute_tool_calls, Task, ParallelExecutor, TaskStatus, ToolCallRequest};
use agent_kernel::tools::{BashTool, ToolContext, ToolHandler, ToolOutcome, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn execute_tool_calls_dispatches_bash_commands_in_parallel() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BashTool::new().with_timeout(5)));
    let registry = Arc::new(registry);

    let calls = vec![
        ToolCallRequest { id: "call-1".into(), name: "bash".into(), arguments: json!({"command": "echo one"}) },
        ToolCallRequest { id: "call-2".into(), name: "bash".into(), arguments: json!({"command": "echo two"}) },
        ToolCallRequest { id: "call-3".into(), name: "bash".into(), arguments: json!({"command": "exit 1"}) },
    ];

    let results = execute_tool_calls(registry, calls, |call| ToolContext { tool_call_id: call.id.clone(), ..Default::default() }, 3, Duration::from_secs(5)).await;

    assert!(results["call-1"].output.clone().unwrap().into_text().contains("one"));
    assert!(results["call-2"].output.clone().unwrap().into_text().contains("two"));
    assert_eq!(results["call-3"].status, TaskStatus::Failed);
}

/// A tool whose concurrent calls are bounded by a shared counter, so the
/// test can confirm `max_concurrency` actually caps in-flight dispatch
/// rather than just letting everything run at once.
struct ConcurrencyTrackingTool {
    current: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolHandler for ConcurrencyTrackingTool {
    fn name(&self) -> &str {
        "track"
    }
    fn description(&self) -> &str {
        "tracks how many instances of itself are running at once"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutcome, String> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutcome::text("ok"))
    }
}

#[tokio::test]
async fn max_concurrency_of_one_serializes_dispatch() {
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ConcurrencyTrackingTool { current: current.clone(), max_seen: max_seen.clone() }));
    let registry = Arc::new(registry);

    let calls: Vec<_> = (0..5).map(|i| ToolCallRequest { id: format!("call-{i}"), name: "track".into(), arguments: json!({}) }).collect();

    execute_tool_calls(registry, calls, |call| ToolContext { tool_call_id: call.id.clone(), ..Default::default() }, 1, Duration::from_secs(5)).await;

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn higher_concurrency_allows_overlap() {
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ConcurrencyTrackingTool { current: current.clone(), max_seen: max_seen.clone() }));
    let registry = Arc::new(registry);

    let calls: Vec<_> = (0..5).map(|i| ToolCallRequest { id: format!("call-{i}"), name: "track".into(), arguments: json!({}) }).collect();

    execute_tool_calls(registry, calls, |call| ToolContext { tool_call_id: call.id.clone(), ..Default::default() }, 4, Duration::from_secs(5)).await;

    assert!(max_seen.load(Ordering::SeqCst) > 1, "expected at least some overlap with 4 concurrent slots");
}

/// A multi-level dependency chain through the lower-level `ParallelExecutor`
/// API (not the tool-call convenience wrapper), confirming a dependent task
/// only starts after its dependency's *output* is available to observe.
#[tokio::test]
async fn dependent_task_runs_strictly_after_its_dependency_completes() {
    let executor = ParallelExecutor::new(4);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let order_a = order.clone();
    let order_b = order.clone();
    let tasks = vec![
        Task::new("fetch", async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            order_a.lock().unwrap().push("fetch");
            Ok::<_, String>(10)
        }),
        Task::new("double", async move {
            order_b.lock().unwrap().push("double");
            Ok::<_, String>(0)
        })
        .depends_on(["fetch"]),
    ];

    let results = executor.execute(tasks).await.unwrap();
    assert_eq!(results["fetch"].status, TaskStatus::Completed);
    assert_eq!(results["double"].status, TaskStatus::Completed);
    assert_eq!(*order.lock().unwrap(), vec!["fetch", "double"]);
}
