//! Background task queue.
//!
//! Tasks are persisted as `queued` before they enter a bounded channel, so
//! the database always knows about every task even if the process stops
//! before the worker reaches it. A single [`TaskWorker`] drains the channel
//! and records each state change before moving on.

use crate::db::{Task, TaskStatus};
use crate::error::{AppError, Result};
use crate::store::{BookCatalog, TaskStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel capacity used when zero is requested.
pub const DEFAULT_BUFFER: usize = 100;

/// Task type enqueued for every discovered book.
pub const FORMAT_TASK: &str = "format";

/// Strategy that performs the work of one task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run `task`. The error's message becomes the task's error text.
    async fn handle(&self, task: &Task) -> Result<()>;
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    sender: mpsc::Sender<Task>,
}

/// Consumer side of the queue.
pub struct TaskWorker {
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    receiver: mpsc::Receiver<Task>,
}

impl TaskQueue {
    /// Create a queue and the worker that drains it.
    pub fn new(
        store: Arc<dyn TaskStore>,
        handler: Arc<dyn TaskHandler>,
        buffer: usize,
    ) -> (Self, TaskWorker) {
        let buffer = if buffer == 0 { DEFAULT_BUFFER } else { buffer };
        let (sender, receiver) = mpsc::channel(buffer);

        let queue = Self {
            store: store.clone(),
            sender,
        };
        let worker = TaskWorker {
            store,
            handler,
            receiver,
        };
        (queue, worker)
    }

    /// Persist a new task and hand it to the worker.
    ///
    /// Waits while the buffer is full. If the worker is gone the task stays
    /// persisted as `queued` and an error is returned.
    pub async fn enqueue(
        &self,
        user_id: &str,
        task_type: &str,
        payload: BTreeMap<String, String>,
    ) -> Result<Task> {
        let task = self.store.create(Task::new(user_id, task_type, payload))?;

        self.sender
            .send(task.clone())
            .await
            .map_err(|_| AppError::Internal("Task worker is not running".to_string()))?;

        tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Task enqueued");
        Ok(task)
    }

    /// Enqueue a fresh copy of an existing task.
    pub async fn retry(&self, user_id: &str, task_id: &str) -> Result<Task> {
        let original = self.store.get(user_id, task_id)?;
        let task = self
            .enqueue(user_id, &original.task_type, original.payload)
            .await?;
        tracing::info!(task_id = %task.id, retry_of = %task_id, "Task retried");
        Ok(task)
    }

    /// All tasks of one user, newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<Task>> {
        self.store.list_by_user(user_id)
    }

    /// Fetch one task.
    pub fn get(&self, user_id: &str, task_id: &str) -> Result<Task> {
        self.store.get(user_id, task_id)
    }
}

impl TaskWorker {
    /// Process tasks one at a time until `cancel` fires or every
    /// [`TaskQueue`] handle has been dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Task worker started");

        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(task) => task,
                    None => break,
                },
            };

            self.process(task, &cancel).await;
        }

        tracing::info!("Task worker stopped");
    }

    async fn process(&self, mut task: Task, cancel: &CancellationToken) {
        if let Err(e) = task.transition(TaskStatus::Running) {
            tracing::warn!(task_id = %task.id, "Skipping task: {}", e);
            return;
        }
        self.persist(&task);

        let started = std::time::Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!(task_id = %task.id, "Task interrupted by shutdown");
                return;
            }
            outcome = self.handler.handle(&task) => outcome,
        };

        let next = match outcome {
            Ok(()) => {
                task.error.clear();
                TaskStatus::Success
            }
            Err(e) => {
                task.error = e.to_string();
                TaskStatus::Error
            }
        };
        if let Err(e) = task.transition(next) {
            tracing::warn!(task_id = %task.id, "{}", e);
            return;
        }
        self.persist(&task);

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            status = %task.status,
            elapsed = ?started.elapsed(),
            "Task finished"
        );
    }

    fn persist(&self, task: &Task) {
        if let Err(e) = self.store.update(task) {
            tracing::error!(task_id = %task.id, status = %task.status, "Failed to persist task: {}", e);
        }
    }
}

/// Handler for `format` tasks.
///
/// Checks that the referenced book still exists in the catalog. Any other
/// task type is rejected.
pub struct FormatTaskHandler {
    catalog: Arc<dyn BookCatalog>,
}

impl FormatTaskHandler {
    /// Create a handler resolving books through `catalog`.
    pub fn new(catalog: Arc<dyn BookCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TaskHandler for FormatTaskHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        if task.task_type != FORMAT_TASK {
            return Err(AppError::Task(format!(
                "unsupported task type: {}",
                task.task_type
            )));
        }

        let book_id = task
            .payload
            .get("book_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Task("missing book_id".to_string()))?;

        let book = self
            .catalog
            .get_by_id(&task.user_id, book_id)
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::Task(format!("book not found: {}", book_id)),
                other => other,
            })?;

        tracing::debug!(
            task_id = %task.id,
            book_id = %book.id,
            format = %book.format,
            "Format task checked"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Book, Database};
    use std::time::Duration;

    /// Fails tasks whose payload carries `fail`, hangs on `hang`.
    struct ScriptedHandler;

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn handle(&self, task: &Task) -> Result<()> {
            if task.payload.contains_key("hang") {
                std::future::pending::<()>().await;
            }
            match task.payload.get("fail") {
                Some(msg) => Err(AppError::Task(msg.clone())),
                None => Ok(()),
            }
        }
    }

    fn payload(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn queue(buffer: usize) -> (TaskQueue, TaskWorker) {
        let store: Arc<dyn TaskStore> = Arc::new(Database::open_memory().unwrap());
        TaskQueue::new(store, Arc::new(ScriptedHandler), buffer)
    }

    async fn wait_for(queue: &TaskQueue, id: &str, status: TaskStatus) -> Task {
        for _ in 0..200 {
            let task = queue.get("user-1", id).unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_task_succeeds() {
        let (queue, worker) = queue(4);
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(cancel.clone()));

        let task = queue
            .enqueue("user-1", FORMAT_TASK, payload(&[("book_id", "b1")]))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        let done = wait_for(&queue, &task.id, TaskStatus::Success).await;
        assert_eq!(done.error, "");
        assert_eq!(done.payload.get("book_id").unwrap(), "b1");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_task_error_keeps_message_and_worker_continues() {
        let (queue, worker) = queue(4);
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(cancel.clone()));

        let failed = queue
            .enqueue("user-1", "format", payload(&[("fail", "boom")]))
            .await
            .unwrap();
        let ok = queue
            .enqueue("user-1", "format", BTreeMap::new())
            .await
            .unwrap();

        let failed = wait_for(&queue, &failed.id, TaskStatus::Error).await;
        assert_eq!(failed.error, "boom");
        wait_for(&queue, &ok.id, TaskStatus::Success).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_enqueue_waits_when_full() {
        let (queue, _worker) = queue(1);

        queue.enqueue("user-1", "format", BTreeMap::new()).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            queue.enqueue("user-1", "format", BTreeMap::new()),
        )
        .await;
        assert!(blocked.is_err());

        // Both rows exist even though only one fit in the buffer.
        let tasks = queue.list("user-1").unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued));
    }

    #[tokio::test]
    async fn test_enqueue_without_worker() {
        let (queue, worker) = queue(1);
        drop(worker);

        let result = queue.enqueue("user-1", "format", BTreeMap::new()).await;
        assert!(matches!(result, Err(AppError::Internal(_))));

        let tasks = queue.list("user-1").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_zero_buffer_uses_default() {
        let (queue, _worker) = queue(0);
        for _ in 0..DEFAULT_BUFFER {
            queue.enqueue("user-1", "format", BTreeMap::new()).await.unwrap();
        }
        assert_eq!(queue.list("user-1").unwrap().len(), DEFAULT_BUFFER);
    }

    #[tokio::test]
    async fn test_cancel_leaves_running_task() {
        let (queue, worker) = queue(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let task = queue
            .enqueue("user-1", "format", payload(&[("hang", "1")]))
            .await
            .unwrap();
        wait_for(&queue, &task.id, TaskStatus::Running).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let task = queue.get("user-1", &task.id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_worker_stops_when_queue_dropped() {
        let (queue, worker) = queue(4);
        let handle = tokio::spawn(worker.run(CancellationToken::new()));
        drop(queue);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_copies_type_and_payload() {
        let (queue, worker) = queue(4);
        let cancel = CancellationToken::new();
        tokio::spawn(worker.run(cancel.clone()));

        let original = queue
            .enqueue("user-1", "format", payload(&[("fail", "nope")]))
            .await
            .unwrap();
        wait_for(&queue, &original.id, TaskStatus::Error).await;

        let retried = queue.retry("user-1", &original.id).await.unwrap();
        assert_ne!(retried.id, original.id);
        assert_eq!(retried.task_type, "format");
        assert_eq!(retried.payload, original.payload);

        assert!(matches!(
            queue.retry("user-2", &original.id).await,
            Err(AppError::NotFound(_))
        ));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_format_handler() {
        let db = Arc::new(Database::open_memory().unwrap());
        let book = db
            .upsert_book("user-1", &Book::discovered("/a.epub", "a", "epub", "c1"))
            .unwrap();
        let handler = FormatTaskHandler::new(db);

        let mut task = Task::new("user-1", "format", payload(&[("book_id", &book.id)]));
        assert!(handler.handle(&task).await.is_ok());

        task.payload = payload(&[("book_id", "nope")]);
        let err = handler.handle(&task).await.unwrap_err();
        assert_eq!(err.to_string(), "book not found: nope");

        task.payload = BTreeMap::new();
        let err = handler.handle(&task).await.unwrap_err();
        assert_eq!(err.to_string(), "missing book_id");

        task.task_type = "thumbnail".to_string();
        let err = handler.handle(&task).await.unwrap_err();
        assert_eq!(err.to_string(), "unsupported task type: thumbnail");
    }
}
