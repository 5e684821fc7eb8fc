//! Task registry.
//!
//! [`TaskRegistry`] owns every task of one server instance. Registries are
//! explicit values; two registries never share IDs or tasks.
//!
//! # Concurrency
//!
//! The ID → entry map sits behind one `parking_lot::RwLock`. Each entry's
//! record has a single writer (its executor) and is published to waiters
//! through the entry's [`CompletionSignal`]; anything read after the signal
//! fires is final.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::Instrument;

use super::exec;
use super::signal::CompletionSignal;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::schema::ResultSchema;
use crate::types::{Task, TaskId, TaskState};

/// Default time a completed task stays inspectable.
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(60);

/// A registry slot: the task record plus its completion latch.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    record: RwLock<Task>,
    signal: CompletionSignal,
}

impl TaskEntry {
    pub(crate) fn id(&self) -> TaskId {
        self.record.read().id
    }

    pub(crate) fn snapshot(&self) -> Task {
        self.record.read().clone()
    }

    /// Waits for completion and returns the final record.
    pub(crate) async fn finished(&self) -> Task {
        self.signal.wait().await;
        self.snapshot()
    }

    /// Moves the task to `Running`. Returns `false` if it was not queued.
    pub(crate) fn start(&self) -> bool {
        let mut record = self.record.write();
        if record.state != TaskState::Queued {
            return false;
        }
        record.state = TaskState::Running;
        record.start_time = Some(chrono::Utc::now().timestamp());
        true
    }

    /// Records the outcome and fires the completion signal.
    pub(crate) fn finish(&self, outcome: Result<Value>) {
        {
            let mut record = self.record.write();
            if record.state.is_terminal() {
                return;
            }
            record.complete_time = Some(chrono::Utc::now().timestamp());
            match outcome {
                Ok(value) => {
                    record.state = TaskState::Success;
                    record.result = Some(value);
                },
                Err(err) => {
                    record.state = TaskState::Error;
                    record.error = Some(err);
                },
            }
        }
        self.signal.complete();
    }
}

/// Registry behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// How long a completed task stays inspectable. `None` keeps it forever.
    pub retention: Option<Duration>,
    /// Validate successful results against their result schema.
    pub schema_validation: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: Some(DEFAULT_TASK_RETENTION),
            schema_validation: true,
        }
    }
}

struct RegistryInner {
    tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
    next_id: AtomicU64,
    retention: Option<Duration>,
    schema_validation: bool,
}

/// Creates, runs and tracks tasks. Cloning yields another handle to the
/// same registry.
///
/// # Examples
///
/// ```
/// use volplane::{RequestContext, TaskRegistry, TaskState};
///
/// # #[tokio::main]
/// # async fn main() {
/// let registry = TaskRegistry::new();
/// let ctx = RequestContext::new();
/// let task = registry.enqueue(&ctx, "answer", None, async { Ok(serde_json::json!(42)) });
///
/// let done = registry.wait(task.id).await.unwrap();
/// assert_eq!(done.state, TaskState::Success);
/// assert_eq!(done.result, Some(serde_json::json!(42)));
/// # }
/// ```
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

impl TaskRegistry {
    /// Creates an empty registry with the default [`RegistryConfig`].
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                retention: config.retention,
                schema_validation: config.schema_validation,
            }),
        }
    }

    pub fn schema_validation(&self) -> bool {
        self.inner.schema_validation
    }

    pub(crate) fn track_entry(
        &self,
        ctx: &RequestContext,
        name: &str,
        schema: Option<&ResultSchema>,
    ) -> Arc<TaskEntry> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let mut record = Task::queued(id, name.to_string(), ctx.user().map(str::to_string));
        record.result_schema = schema.map(|s| s.name().to_string());
        let entry = Arc::new(TaskEntry {
            record: RwLock::new(record),
            signal: CompletionSignal::new(),
        });
        self.inner.tasks.write().insert(id, Arc::clone(&entry));
        tracing::debug!(task = id, name, request = %ctx.request_id(), "tracked task");
        entry
    }

    /// Allocates a queued task without starting it. Never blocks.
    ///
    /// Start it later with [`start`](Self::start).
    pub fn track(&self, ctx: &RequestContext, name: &str) -> Task {
        self.track_entry(ctx, name, None).snapshot()
    }

    /// Tracks a task and runs `run` concurrently, returning the queued
    /// record immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F>(
        &self,
        ctx: &RequestContext,
        name: &str,
        schema: Option<ResultSchema>,
        run: F,
    ) -> Task
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let entry = self.track_entry(ctx, name, schema.as_ref());
        let task = entry.snapshot();
        self.spawn(entry, schema, run, ctx);
        task
    }

    /// Starts a task created by [`track`](Self::track).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an unknown ID, [`Error::InvalidTask`] if the
    /// task is no longer queued.
    pub fn start<F>(
        &self,
        ctx: &RequestContext,
        id: TaskId,
        schema: Option<ResultSchema>,
        run: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let entry = self.entry(id).ok_or_else(|| Error::not_found("task", id.to_string()))?;
        {
            let mut record = entry.record.write();
            if record.state != TaskState::Queued {
                return Err(Error::InvalidTask { id });
            }
            record.result_schema = schema.as_ref().map(|s| s.name().to_string());
        }
        self.spawn(entry, schema, run, ctx);
        Ok(())
    }

    fn spawn<F>(
        &self,
        entry: Arc<TaskEntry>,
        schema: Option<ResultSchema>,
        run: F,
        ctx: &RequestContext,
    ) where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let registry = self.clone();
        let span = tracing::info_span!(
            "task",
            id = entry.id(),
            request = %ctx.request_id()
        );
        tokio::spawn(async move { registry.run_entry(entry, schema, run).await }.instrument(span));
    }

    /// Executes an already tracked entry on the current task and schedules
    /// its removal.
    pub(crate) async fn run_entry<F>(
        &self,
        entry: Arc<TaskEntry>,
        schema: Option<ResultSchema>,
        run: F,
    ) where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let validate = self.inner.schema_validation;
        exec::execute(&entry, schema.as_ref(), validate, run).await;
        self.schedule_removal(entry.id());
    }

    /// Completes a tracked entry that will never run.
    pub(crate) fn abort_entry(&self, entry: &TaskEntry, err: Error) {
        entry.finish(Err(err));
        self.schedule_removal(entry.id());
    }

    fn schedule_removal(&self, id: TaskId) {
        let Some(retention) = self.inner.retention else {
            return;
        };
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if registry.inner.tasks.write().remove(&id).is_some() {
                tracing::trace!(task = id, "removed completed task");
            }
        });
    }

    fn entry(&self, id: TaskId) -> Option<Arc<TaskEntry>> {
        self.inner.tasks.read().get(&id).cloned()
    }

    /// Non-blocking point lookup.
    pub fn inspect(&self, id: TaskId) -> Option<Task> {
        self.entry(id).map(|e| e.snapshot())
    }

    /// All tasks currently in the registry, ordered by ID.
    pub fn tasks(&self) -> Vec<Task> {
        let entries: Vec<_> = self.inner.tasks.read().values().cloned().collect();
        let mut tasks: Vec<Task> = entries.iter().map(|e| e.snapshot()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.read().is_empty()
    }

    /// A future that resolves when task `id` completes.
    ///
    /// Resolves immediately for an unknown ID.
    pub fn completion(&self, id: TaskId) -> impl Future<Output = ()> + Send + 'static {
        let wait = self.entry(id).map(|e| e.signal.wait());
        async move {
            if let Some(wait) = wait {
                wait.await;
            }
        }
    }

    /// A future that resolves once every listed task has completed.
    ///
    /// Unknown IDs count as complete.
    pub fn completion_all(&self, ids: &[TaskId]) -> impl Future<Output = ()> + Send + 'static {
        let waits: Vec<_> = ids.iter().map(|id| self.completion(*id)).collect();
        async move {
            join_all(waits).await;
        }
    }

    /// Waits for task `id` and returns its final record.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] immediately if the ID is unknown.
    pub async fn wait(&self, id: TaskId) -> Result<Task> {
        let entry = self.entry(id).ok_or_else(|| Error::not_found("task", id.to_string()))?;
        entry.signal.wait().await;
        Ok(entry.snapshot())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if the task is still in progress.
    pub async fn wait_timeout(&self, id: TaskId, timeout: Duration) -> Result<Task> {
        tokio::time::timeout(timeout, self.wait(id))
            .await
            .map_err(|_| Error::TimedOut { id })?
    }

    /// Waits for every listed task and returns their final records in the
    /// same order. Unknown IDs are skipped.
    pub async fn wait_all(&self, ids: &[TaskId]) -> Vec<Task> {
        let entries: Vec<_> = ids.iter().filter_map(|id| self.entry(*id)).collect();
        join_all(entries.iter().map(|e| e.signal.wait())).await;
        entries.iter().map(|e| e.snapshot()).collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .field("retention", &self.inner.retention)
            .field("schema_validation", &self.inner.schema_validation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn track_allocates_queued_tasks() {
        let registry = TaskRegistry::new();
        let ctx = RequestContext::new().with_user("bob");
        let a = registry.track(&ctx, "a");
        let b = registry.track(&ctx, "b");
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.state, TaskState::Queued);
        assert_eq!(a.user.as_deref(), Some("bob"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn start_runs_tracked_task_once() {
        let registry = TaskRegistry::new();
        let ctx = RequestContext::new();
        let task = registry.track(&ctx, "later");
        registry
            .start(&ctx, task.id, None, async { Ok(json!("ok")) })
            .unwrap();
        let done = registry.wait(task.id).await.unwrap();
        assert_eq!(done.result, Some(json!("ok")));
        assert!(matches!(
            registry.start(&ctx, task.id, None, async { Ok(Value::Null) }),
            Err(Error::InvalidTask { .. })
        ));
    }

    #[tokio::test]
    async fn records_carry_their_schema_name() {
        let registry = TaskRegistry::new();
        let ctx = RequestContext::new();
        let schema = ResultSchema::compile("answer", &json!({ "type": "integer" })).unwrap();

        let queued = registry.enqueue(&ctx, "answer", Some(schema.clone()), async { Ok(json!(42)) });
        assert_eq!(queued.result_schema.as_deref(), Some("answer"));

        let tracked = registry.track(&ctx, "later");
        assert_eq!(tracked.result_schema, None);
        registry
            .start(&ctx, tracked.id, Some(schema), async { Ok(json!(7)) })
            .unwrap();
        let done = registry.wait(tracked.id).await.unwrap();
        assert_eq!(done.result_schema.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn unknown_ids() {
        let registry = TaskRegistry::new();
        assert!(registry.inspect(99).is_none());
        assert!(matches!(
            registry.wait(99).await,
            Err(Error::NotFound { kind: "task", .. })
        ));
        registry.completion(99).await;
        assert!(registry.wait_all(&[98, 99]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_tasks_are_evicted_after_retention() {
        let registry = TaskRegistry::with_config(RegistryConfig {
            retention: Some(Duration::from_secs(5)),
            ..RegistryConfig::default()
        });
        let ctx = RequestContext::new();
        let task = registry.enqueue(&ctx, "short", None, async { Ok(Value::Null) });
        registry.wait(task.id).await.unwrap();
        assert!(registry.inspect(task.id).is_some());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.inspect(task.id).is_none());
    }

    #[tokio::test]
    async fn wait_timeout_reports_still_running() {
        let registry = TaskRegistry::new();
        let ctx = RequestContext::new();
        let task = registry.enqueue(&ctx, "slow", None, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });
        let err = registry
            .wait_timeout(task.id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimedOut { id } if id == task.id));
    }
}
