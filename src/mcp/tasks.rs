//! Long-running tool invocations.
//!
//! A task is created when a task-augmented `tools/call` is accepted and is
//! then driven by the client through `tasks/get`, `tasks/result`,
//! `tasks/cancel` and `tasks/list`. Each task may carry a TTL after which it
//! is discarded without notice.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mcp::protocol::{ToolResult, RELATED_TASK_META_KEY};
use crate::mcp::registry::{paginate, Page};

/// Default interval, in milliseconds, suggested to clients between polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Wire representation of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Milliseconds from creation until the task is discarded; `null` keeps it forever.
    pub ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<u64>,
}

/// Changes to merge into a task. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub status_message: Option<String>,
    pub poll_interval: Option<u64>,
    pub ttl: Option<Option<u64>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval = Some(interval_ms);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: Option<u64>) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `tasks/get`, `tasks/result` and `tasks/cancel` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: String,
}

/// `tasks/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResult {
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Reply to a task-augmented `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResult {
    pub task: Task,
}

pub type RefreshFn = Arc<dyn Fn(&Task) -> TaskUpdate + Send + Sync>;
pub type ResultFn = Arc<dyn Fn() -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// Behaviour supplied by the tool that started a task.
#[derive(Clone)]
pub struct TaskCallbacks {
    /// Consulted on every `tasks/get`.
    pub refresh: RefreshFn,
    /// Produces the final payload for `tasks/result`.
    pub result: ResultFn,
    /// Present only for cancellable tasks.
    pub cancel: Option<CancelFn>,
    pub poll_interval_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
}

impl TaskCallbacks {
    pub fn new<F, Fut>(result: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            refresh: Arc::new(|_: &Task| TaskUpdate::default()),
            result: Arc::new(move || result().boxed()),
            cancel: None,
            poll_interval_ms: None,
            ttl_ms: None,
        }
    }

    pub fn with_refresh(mut self, refresh: impl Fn(&Task) -> TaskUpdate + Send + Sync + 'static) -> Self {
        self.refresh = Arc::new(refresh);
        self
    }

    pub fn with_cancel(mut self, cancel: impl Fn() + Send + Sync + 'static) -> Self {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = Some(interval_ms);
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }
}

struct TaskEntry {
    task: Task,
    callbacks: TaskCallbacks,
    session_id: Option<String>,
    created: Instant,
    generation: u64,
    timer: Option<AbortHandle>,
    /// Runtime the task was created on. Timers are armed there even when
    /// an update arrives from a thread outside the runtime.
    runtime: Option<Handle>,
}

impl Drop for TaskEntry {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

type TaskMap = BTreeMap<String, TaskEntry>;

/// Registry of live tasks.
///
/// Callbacks are cloned out of the map before they run, so a callback may
/// freely call back into the manager.
pub struct TaskManager {
    tasks: Arc<Mutex<TaskMap>>,
    default_poll_interval: u64,
}

impl TaskManager {
    pub fn new(default_poll_interval: u64) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            default_poll_interval,
        }
    }

    /// Register a task. `requested_ttl` comes from the request's task metadata
    /// and wins over the callbacks' own TTL.
    pub fn create(
        &self,
        callbacks: TaskCallbacks,
        session_id: Option<String>,
        requested_ttl: Option<u64>,
    ) -> Task {
        let now = Utc::now();
        let task = Task {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Working,
            status_message: None,
            created_at: now,
            last_updated_at: now,
            ttl: requested_ttl.or(callbacks.ttl_ms),
            poll_interval: Some(callbacks.poll_interval_ms.unwrap_or(self.default_poll_interval)),
        };

        let entry = TaskEntry {
            task: task.clone(),
            callbacks,
            session_id,
            created: Instant::now(),
            generation: 0,
            timer: None,
            runtime: Handle::try_current().ok(),
        };

        // Armed under the lock so a zero TTL cannot fire before the insert.
        let mut tasks = self.tasks.lock();
        let entry = tasks.entry(task.task_id.clone()).or_insert(entry);
        arm_expiry(&self.tasks, entry);
        drop(tasks);

        info!(task_id = %task.task_id, ttl = ?task.ttl, "Task created");
        task
    }

    /// Poll a task: consult its refresh callback and merge the outcome.
    pub fn get(&self, task_id: &str) -> Result<Task> {
        let (snapshot, refresh) = {
            let tasks = self.tasks.lock();
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            (entry.task.clone(), entry.callbacks.refresh.clone())
        };

        let update = refresh(&snapshot);
        self.apply(task_id, update)
    }

    /// Merge `update` into a task, bump `lastUpdatedAt` and re-arm the
    /// expiry timer if the TTL changed.
    pub fn apply(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        let mut tasks = self.tasks.lock();
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;

        if let Some(status) = update.status {
            if status != entry.task.status {
                debug!(task_id, from = ?entry.task.status, to = ?status, "Task status changed");
            }
            entry.task.status = status;
        }
        if let Some(message) = update.status_message {
            entry.task.status_message = Some(message);
        }
        if let Some(interval) = update.poll_interval {
            entry.task.poll_interval = Some(interval);
        }
        let ttl_changed = match update.ttl {
            Some(ttl) if ttl != entry.task.ttl => {
                entry.task.ttl = ttl;
                true
            }
            _ => false,
        };
        entry.task.last_updated_at = Utc::now();

        if ttl_changed {
            arm_expiry(&self.tasks, entry);
        }
        Ok(entry.task.clone())
    }

    /// Run the task's result callback and tag the payload with the task id.
    pub async fn result(&self, task_id: &str) -> Result<ToolResult> {
        let result = {
            let tasks = self.tasks.lock();
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            entry.callbacks.result.clone()
        };

        let mut payload = result()
            .await
            .map_err(|e| Error::Internal(format!("Unknown Error: {e}")))?;
        payload
            .meta
            .get_or_insert_with(Map::new)
            .insert(RELATED_TASK_META_KEY.to_string(), json!({ "taskId": task_id }));
        Ok(payload)
    }

    /// Cancel a task through its cancel callback.
    pub fn cancel(&self, task_id: &str) -> Result<Task> {
        let cancel = {
            let tasks = self.tasks.lock();
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            entry
                .callbacks
                .cancel
                .clone()
                .ok_or_else(|| Error::TaskNotCancellable(task_id.to_string()))?
        };

        cancel();
        info!(task_id, "Task cancelled");
        self.apply(task_id, TaskUpdate::status(TaskStatus::Cancelled))
    }

    pub fn list(&self, cursor: Option<&str>, page_size: usize) -> Page<Task> {
        paginate(&self.tasks.lock(), cursor, page_size, |entry| entry.task.clone())
    }

    /// Session that started the task, if any.
    pub fn session_of(&self, task_id: &str) -> Option<String> {
        self.tasks
            .lock()
            .get(task_id)
            .and_then(|entry| entry.session_id.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

/// (Re)arm the expiry timer for `entry`. Any previous timer is aborted and
/// its generation retired, so only the latest timer can remove the task.
fn arm_expiry(tasks: &Arc<Mutex<TaskMap>>, entry: &mut TaskEntry) {
    if let Some(timer) = entry.timer.take() {
        timer.abort();
    }
    entry.generation += 1;

    let Some(ttl) = entry.task.ttl else {
        return;
    };
    let Some(runtime) = entry.runtime.clone() else {
        warn!(task_id = %entry.task.task_id, "No runtime to arm task expiry on");
        return;
    };
    let remaining = Duration::from_millis(ttl).saturating_sub(entry.created.elapsed());
    let tasks: Weak<Mutex<TaskMap>> = Arc::downgrade(tasks);
    let task_id = entry.task.task_id.clone();
    let generation = entry.generation;

    let handle = runtime.spawn(async move {
        tokio::time::sleep(remaining).await;
        let Some(tasks) = tasks.upgrade() else {
            return;
        };
        let expired = {
            let mut tasks = tasks.lock();
            match tasks.get_mut(&task_id) {
                Some(entry) if entry.generation == generation => {
                    // The running timer must not abort itself on drop.
                    entry.timer = None;
                    tasks.remove(&task_id)
                }
                _ => None,
            }
        };
        if expired.is_some() {
            info!(task_id = %task_id, "Task expired");
        }
    });
    entry.timer = Some(handle.abort_handle());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::success_result;
    use crate::mcp::protocol::ContentBlock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn echo_callbacks(text: &'static str) -> TaskCallbacks {
        TaskCallbacks::new(move || async move { Ok(success_result(text)) })
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("done"), Some("s".into()), None);

        assert_eq!(task.status, TaskStatus::Working);
        assert_eq!(task.created_at, task.last_updated_at);
        assert_eq!(task.ttl, None);
        assert_eq!(task.poll_interval, Some(DEFAULT_POLL_INTERVAL_MS));
        assert!(Uuid::parse_str(&task.task_id).is_ok());
        assert_eq!(manager.session_of(&task.task_id).as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_requested_ttl_wins() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("x").with_ttl(10_000), None, Some(500));
        assert_eq!(task.ttl, Some(500));

        let task = manager.create(echo_callbacks("x").with_ttl(10_000), None, None);
        assert_eq!(task.ttl, Some(10_000));
    }

    #[tokio::test]
    async fn test_get_merges_refresh() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let callbacks = echo_callbacks("x").with_refresh(|_| {
            TaskUpdate::status(TaskStatus::Completed).with_message("All done")
        });
        let created = manager.create(callbacks, None, None);

        let polled = manager.get(&created.task_id).unwrap();
        assert_eq!(polled.status, TaskStatus::Completed);
        assert_eq!(polled.status_message.as_deref(), Some("All done"));
        assert!(polled.last_updated_at >= created.last_updated_at);
        assert_eq!(polled.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_refresh_may_reenter_manager() {
        let manager = Arc::new(TaskManager::new(DEFAULT_POLL_INTERVAL_MS));
        let inner = Arc::downgrade(&manager);
        let callbacks = echo_callbacks("x").with_refresh(move |task| {
            // Reading the manager from inside a callback must not deadlock.
            let count = inner.upgrade().map_or(0, |m| m.len());
            TaskUpdate::message(format!("{} of {count}", task.task_id.len()))
        });
        let task = manager.create(callbacks, None, None);

        let polled = manager.get(&task.task_id).unwrap();
        assert_eq!(polled.status_message.as_deref(), Some("36 of 1"));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        assert!(matches!(manager.get("nope"), Err(Error::TaskNotFound(_))));
        assert!(matches!(manager.cancel("nope"), Err(Error::TaskNotFound(_))));
        assert!(matches!(
            manager.result("nope").await,
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_result_tagged_with_task_id() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("payload"), None, None);

        let result = manager.result(&task.task_id).await.unwrap();
        let meta = result.meta.unwrap();
        assert_eq!(
            meta[RELATED_TASK_META_KEY],
            json!({ "taskId": task.task_id })
        );
        // Fetching the result does not remove the task.
        assert!(manager.contains(&task.task_id));
    }

    #[tokio::test]
    async fn test_result_error_is_internal() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let callbacks = TaskCallbacks::new(|| async { Err(Error::Internal("boom".into())) });
        let task = manager.create(callbacks, None, None);

        let err = manager.result(&task.task_id).await.unwrap_err();
        assert_eq!(err.code(), -32603);
        assert!(err.to_string().contains("Unknown Error"));
    }

    #[tokio::test]
    async fn test_cancel_without_callback() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("x"), None, None);

        assert!(matches!(
            manager.cancel(&task.task_id),
            Err(Error::TaskNotCancellable(_))
        ));
        assert_eq!(manager.get(&task.task_id).unwrap().status, TaskStatus::Working);
    }

    #[tokio::test]
    async fn test_cancel_invokes_callback() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let callbacks = echo_callbacks("x").with_cancel(move || flag.store(true, Ordering::SeqCst));
        let task = manager.create(callbacks, None, None);

        let after = manager.cancel(&task.task_id).unwrap();
        assert_eq!(after.status, TaskStatus::Cancelled);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let callbacks = echo_callbacks("x").with_refresh(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TaskUpdate::default()
        });
        let task = manager.create(callbacks, None, Some(1_000));

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(manager.get(&task.task_id).is_ok());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(matches!(
            manager.get(&task.task_id),
            Err(Error::TaskNotFound(_))
        ));
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_extension_rearms_timer() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("x"), None, Some(1_000));

        tokio::time::sleep(Duration::from_millis(500)).await;
        manager
            .apply(&task.task_id, TaskUpdate::default().with_ttl(Some(5_000)))
            .unwrap();

        // The original deadline passes without removing the task.
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(manager.contains(&task.task_id));

        // TTL counts from creation, not from the update.
        tokio::time::sleep(Duration::from_millis(3_501)).await;
        assert!(!manager.contains(&task.task_id));
    }

    #[tokio::test]
    async fn test_ttl_update_from_worker_thread() {
        let manager = Arc::new(TaskManager::new(DEFAULT_POLL_INTERVAL_MS));
        let task = manager.create(echo_callbacks("x"), None, Some(60_000));

        let worker = manager.clone();
        let task_id = task.task_id.clone();
        let updated = std::thread::spawn(move || {
            worker.apply(
                &task_id,
                TaskUpdate::status(TaskStatus::Completed).with_ttl(Some(20)),
            )
        })
        .join()
        .expect("worker thread panicked")
        .unwrap();
        assert_eq!(updated.ttl, Some(20));

        // The re-armed timer runs on the task's runtime.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!manager.contains(&task.task_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_available_until_expiry() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("kept"), None, Some(1_000));

        tokio::time::sleep(Duration::from_millis(900)).await;
        let result = manager.result(&task.task_id).await.unwrap();
        assert!(matches!(&result.content[0], ContentBlock::Text { text } if text == "kept"));

        tokio::time::sleep(Duration::from_millis(101)).await;
        assert!(matches!(
            manager.result(&task.task_id).await,
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_ttl_keeps_task() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        let task = manager.create(echo_callbacks("x"), None, Some(100));
        manager
            .apply(&task.task_id, TaskUpdate::default().with_ttl(None))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(manager.contains(&task.task_id));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let manager = TaskManager::new(DEFAULT_POLL_INTERVAL_MS);
        for _ in 0..5 {
            manager.create(echo_callbacks("x"), None, None);
        }

        let first = manager.list(None, 3);
        assert_eq!(first.items.len(), 3);
        let cursor = first.next_cursor.unwrap();

        let second = manager.list(Some(&cursor), 3);
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());
        assert_eq!(second.items[0].task_id, cursor);
    }

    #[test]
    fn test_task_wire_format() {
        let now = Utc::now();
        let task = Task {
            task_id: "t-1".into(),
            status: TaskStatus::InputRequired,
            status_message: None,
            created_at: now,
            last_updated_at: now,
            ttl: None,
            poll_interval: Some(500),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["taskId"], "t-1");
        assert_eq!(json["status"], "input_required");
        assert!(json["ttl"].is_null());
        assert_eq!(json["pollInterval"], 500);
        assert!(json.get("statusMessage").is_none());
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
    }
}
