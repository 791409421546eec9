//! §4.H parallel executor: dependency-aware concurrent task execution,
//! grounded in `original_source/koda/agent/parallel.py`'s `ParallelExecutor`
//! and `ParallelToolExecutor`.
//!
//! Tasks are topologically sorted into levels (a task's level is one past
//! the max level of its dependencies); each level runs fully concurrently,
//! bounded by a semaphore, before the next level starts. A failed dependency
//! fails everything that depends on it without running it.

use crate::error::AgentError;
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// One unit of work in a parallel batch. `T` is whatever the task produces
/// on success; failures are always plain strings, matching the registry's
/// `ToolHandler::execute` error type.
pub struct Task<T> {
    pub id: String,
    pub dependencies: HashSet<String>,
    pub timeout: Option<Duration>,
    future: Pin<Box<dyn Future<Output = Result<T, String>> + Send>>,
}

impl<T> Task<T> {
    pub fn new(id: impl Into<String>, future: impl Future<Output = Result<T, String>> + Send + 'static) -> Self {
        Self { id: id.into(), dependencies: HashSet::new(), timeout: None, future: Box::pin(future) }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub struct TaskResult<T> {
    pub task_id: String,
    pub status: TaskStatus,
    pub output: Option<T>,
    pub error: Option<String>,
    pub execution_time: Duration,
}

pub struct ParallelExecutor {
    max_concurrency: usize,
}

impl ParallelExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency: max_concurrency.max(1) }
    }

    /// Run every task, respecting `dependencies`, with at most
    /// `max_concurrency` tasks in flight at once. Returns an error only for
    /// structural problems (unknown dependency, cycle) discovered before
    /// anything runs; individual task failures show up in each
    /// `TaskResult`, not as an `Err` from this function.
    pub async fn execute<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> Result<HashMap<String, TaskResult<T>>, AgentError> {
        let levels = Self::group_by_levels(&tasks)?;
        let mut by_id: HashMap<String, Task<T>> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let results: Arc<Mutex<HashMap<String, TaskResult<T>>>> = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        for level in levels {
            let mut handles = Vec::with_capacity(level.len());
            for id in level {
                let task = by_id.remove(&id).expect("level membership implies task exists in by_id");
                let deps = task.dependencies;
                let timeout = task.timeout;
                let fut = task.future;
                let sem = semaphore.clone();
                let results_ref = results.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore is never closed");
                    let start = Instant::now();

                    let failed_dep = {
                        let guard = results_ref.lock().await;
                        deps.iter().find(|d| matches!(guard.get(d.as_str()), Some(r) if r.status == TaskStatus::Failed)).cloned()
                    };

                    let result = if let Some(dep) = failed_dep {
                        TaskResult {
                            task_id: id.clone(),
                            status: TaskStatus::Failed,
                            output: None,
                            error: Some(format!("dependency '{dep}' failed")),
                            execution_time: start.elapsed(),
                        }
                    } else {
                        let outcome = match timeout {
                            Some(d) => match tokio::time::timeout(d, fut).await {
                                Ok(inner) => inner,
                                Err(_) => Err(format!("task '{id}' timed out after {d:?}")),
                            },
                            None => fut.await,
                        };
                        match outcome {
                            Ok(value) => TaskResult {
                                task_id: id.clone(),
                                status: TaskStatus::Completed,
                                output: Some(value),
                                error: None,
                                execution_time: start.elapsed(),
                            },
                            Err(e) => TaskResult {
                                task_id: id.clone(),
                                status: TaskStatus::Failed,
                                output: None,
                                error: Some(e),
                                execution_time: start.elapsed(),
                            },
                        }
                    };

                    results_ref.lock().await.insert(id, result);
                }));
            }

            for handle in handles {
                handle.await.map_err(|e| AgentError::DependencyFailed(format!("task panicked: {e}")))?;
            }
        }

        Ok(Arc::try_unwrap(results)
            .unwrap_or_else(|_| panic!("all spawned tasks are joined by this point"))
            .into_inner())
    }

    /// Kahn's-algorithm-style level grouping: repeatedly peel off the set of
    /// not-yet-scheduled tasks whose dependencies are all satisfied. An
    /// empty peel with tasks still remaining means a cycle.
    fn group_by_levels<T>(tasks: &[Task<T>]) -> Result<Vec<Vec<String>>, AgentError> {
        let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        for t in tasks {
            for dep in &t.dependencies {
                if !known.contains(dep.as_str()) {
                    return Err(AgentError::DependencyFailed(format!("task '{}' depends on unknown task '{}'", t.id, dep)));
                }
            }
        }

        let mut remaining: HashMap<&str, &HashSet<String>> =
            tasks.iter().map(|t| (t.id.as_str(), &t.dependencies)).collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let level: Vec<String> = remaining
                .iter()
                .filter(|(_, deps)| deps.iter().all(|d| completed.contains(d)))
                .map(|(id, _)| id.to_string())
                .collect();

            if level.is_empty() {
                return Err(AgentError::DependencyFailed("dependency cycle detected".to_string()));
            }

            for id in &level {
                remaining.remove(id.as_str());
            }
            completed.extend(level.iter().cloned());
            levels.push(level);
        }

        Ok(levels)
    }
}

/// One tool call awaiting dispatch, as produced from an assistant message's
/// `ContentPart::ToolCall` entries.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// §4.H + §4.D combined: dispatch every tool call from one assistant turn
/// concurrently through a shared registry, matching `ParallelToolExecutor`.
/// Tool calls in a single turn carry no inter-call dependencies, so this
/// always runs as one level — the dependency machinery above exists for
/// callers that need staged execution, not for this common case.
pub async fn execute_tool_calls(
    registry: Arc<ToolRegistry>,
    calls: Vec<ToolCallRequest>,
    make_ctx: impl Fn(&ToolCallRequest) -> ToolContext,
    max_concurrency: usize,
    timeout: Duration,
) -> HashMap<String, TaskResult<ToolOutcome>> {
    let tasks = calls
        .into_iter()
        .map(|call| {
            let ctx = make_ctx(&call);
            let registry = registry.clone();
            Task::new(call.id.clone(), async move { registry.dispatch(&call.name, call.arguments, &ctx).await })
                .with_timeout(timeout)
        })
        .collect();

    ParallelExecutor::new(max_concurrency)
        .execute(tasks)
        .await
        .expect("tool-call tasks declare no dependencies, so grouping can never fail")
}
